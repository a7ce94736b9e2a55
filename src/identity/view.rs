use parking_lot::Mutex;

/// Navigation targets of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Login,
    Home,
    Dashboard,
    Staff,
    Manager,
    Hr,
    Ceo,
}

impl View {
    pub fn path(&self) -> &'static str {
        match self {
            View::Login => "/login",
            View::Home => "/",
            View::Dashboard => "/dashboard",
            View::Staff => "/staff",
            View::Manager => "/manager",
            View::Hr => "/hr",
            View::Ceo => "/ceo",
        }
    }
}

/// Something that can move the user to another view.
pub trait Navigator: Send + Sync {
    fn redirect(&self, view: View);
}

/// Keeps every redirect it is asked for. The HTTP front turns the last one into a response.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    redirects: Mutex<Vec<View>>,
}

impl RecordingNavigator {
    pub fn redirects(&self) -> Vec<View> { self.redirects.lock().clone() }

    pub fn last(&self) -> Option<View> { self.redirects.lock().last().copied() }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, view: View) { self.redirects.lock().push(view); }
}
