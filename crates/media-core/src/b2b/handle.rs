//! Counted handle on a B2B media session

use std::ops::Deref;
use std::sync::Arc;

use super::session::B2BMediaSession;

/// Holds one reference on a [`B2BMediaSession`]
///
/// The signaling sessions of both legs keep one each. Dropping the last
/// handle (with the scheduler done as well) finalizes the session.
#[derive(Debug)]
pub struct SessionRef {
    session: Arc<B2BMediaSession>,
}

impl SessionRef {
    pub fn new(session: Arc<B2BMediaSession>) -> Self {
        session.add_reference();
        Self { session }
    }

    pub fn session(&self) -> &Arc<B2BMediaSession> {
        &self.session
    }
}

impl Clone for SessionRef {
    fn clone(&self) -> Self {
        Self::new(self.session.clone())
    }
}

impl Deref for SessionRef {
    type Target = B2BMediaSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl Drop for SessionRef {
    fn drop(&mut self) {
        if self.session.release_reference() {
            self.session.finalize();
        }
    }
}
