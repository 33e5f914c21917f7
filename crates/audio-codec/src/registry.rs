//! Handle-based access to decode sessions.
//!
//! Callers that cannot hold a [`DecodeSession`] directly (a foreign binding, a
//! command loop) address sessions by [`SessionId`]. The registry owns every
//! session it hands out; closing removes and tears it down.

use std::collections::HashMap;
use std::fmt;

use crate::codec::{Decoder, DecoderFactory};
use crate::config::EngineConfig;
use crate::demux::Demuxer;
use crate::error::{CodecError, Result};
use crate::format::TrackDescriptor;
use crate::session::{DecodeSession, PullOutput, SeekPosition};

/// Opaque handle to a registered session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Owning map from handles to open sessions.
pub struct SessionRegistry<X: Demuxer, C: Decoder> {
    sessions: HashMap<SessionId, DecodeSession<X, C>>,
    next_id: u64,
}

impl<X: Demuxer, C: Decoder> Default for SessionRegistry<X, C> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<X: Demuxer, C: Decoder> SessionRegistry<X, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session and register it. Nothing is registered on failure.
    pub fn open<F>(
        &mut self,
        demuxer: X,
        factory: &F,
        config: EngineConfig,
    ) -> Result<(SessionId, TrackDescriptor)>
    where
        F: DecoderFactory<Decoder = C>,
    {
        let session = DecodeSession::open(demuxer, factory, config)?;
        let track = session.track().clone();
        Ok((self.insert(session), track))
    }

    /// Take ownership of an already open session.
    pub fn insert(&mut self, session: DecodeSession<X, C>) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(id, session);
        tracing::debug!(%id, "session registered");
        id
    }

    pub fn get_mut(&mut self, id: SessionId) -> Result<&mut DecodeSession<X, C>> {
        self.sessions
            .get_mut(&id)
            .ok_or(CodecError::UnknownSession(id.0))
    }

    pub fn pull_output(&mut self, id: SessionId) -> Result<PullOutput<'_>> {
        self.get_mut(id)?.pull_output()
    }

    pub fn release_output(&mut self, id: SessionId) -> Result<()> {
        self.get_mut(id)?.release_output()
    }

    pub fn seek(&mut self, id: SessionId, ms: u64) -> Result<SeekPosition> {
        self.get_mut(id)?.seek(ms)
    }

    /// Tear down and forget a session. Returns `false` if `id` was not open.
    pub fn close(&mut self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some(mut session) => {
                session.close();
                tracing::debug!(%id, "session closed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
