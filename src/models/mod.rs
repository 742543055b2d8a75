mod session;

pub use session::CompletedSession;
