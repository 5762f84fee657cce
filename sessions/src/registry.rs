//! Request-scoped session registry.
//!
//! A handler may ask for the same named session several times while serving
//! one request. The registry decodes and loads each name once and hands back
//! the same session afterwards, so changes made through one reference are
//! seen by the next. Create one registry per request and drop it afterwards.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::cookies::{RequestCookies, ResponseCookies};
use crate::error::{Result, SessionError};
use crate::providers::DocumentStore;
use crate::state::Session;
use crate::store::{SessionLoad, SessionStore};

#[derive(Debug)]
struct Registered {
    session: Session,
    error: Option<SessionError>,
}

/// Sessions already created for the current request, keyed by name.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Registered>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The session named `name`, creating it on first use.
    ///
    /// Later calls with the same name return the same session and the error
    /// recorded when it was created.
    pub async fn get<D, R>(
        &mut self,
        store: &SessionStore<D>,
        request: &R,
        name: &str,
    ) -> (&mut Session, Option<SessionError>)
    where
        D: DocumentStore,
        R: RequestCookies + ?Sized,
    {
        let registered = match self.sessions.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let SessionLoad { session, error } = store.new_session(request, name).await;
                entry.insert(Registered { session, error })
            }
        };
        (&mut registered.session, registered.error.clone())
    }

    /// Session named `name`, if already created.
    #[must_use]
    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name).map(|registered| &registered.session)
    }

    /// Number of sessions created for this request.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` if no session was requested yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Save every registered session, in name order.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first save error.
    pub async fn save_all<D, W>(&mut self, store: &SessionStore<D>, response: &mut W) -> Result<()>
    where
        D: DocumentStore,
        W: ResponseCookies + ?Sized,
    {
        let mut names: Vec<&String> = self.sessions.keys().collect();
        names.sort();
        let names: Vec<String> = names.into_iter().cloned().collect();

        for name in names {
            if let Some(registered) = self.sessions.get_mut(&name) {
                store.save(&mut registered.session, response).await?;
            }
        }
        Ok(())
    }
}
