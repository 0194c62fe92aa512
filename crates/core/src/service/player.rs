//! Player registry and login/kickoff semantics.
//!
//! Two maps — by username and by session id — are kept in lockstep under a
//! single mutex. Kickoff calls into the session manager while holding the
//! player lock, which fixes the lock order at player-service → session
//! manager. The reverse edge (session eviction → player removal) arrives via
//! the event bus with no locks held, so no inversion exists.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::StatusError;
use crate::events::{Event, EventBus};
use crate::proto::LoginRequest;
use crate::session::{Session, SessionManager};

/// An authenticated logical user bound to a session.
#[derive(Debug)]
pub struct Player {
    pub username: String,
    pub session: Arc<Session>,
}

#[derive(Default)]
struct PlayerMaps {
    by_user: HashMap<String, Arc<Player>>,
    by_session: HashMap<Uuid, Arc<Player>>,
}

impl PlayerMaps {
    fn insert(&mut self, player: Arc<Player>) {
        self.by_user.insert(player.username.clone(), Arc::clone(&player));
        self.by_session.insert(player.session.id(), player);
    }

    fn remove(&mut self, player: &Player) {
        self.by_user.remove(&player.username);
        self.by_session.remove(&player.session.id());
    }
}

pub struct PlayerService {
    maps: Mutex<PlayerMaps>,
    password: String,
    sessions: Arc<SessionManager>,
}

impl PlayerService {
    pub fn new(password: String, sessions: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(PlayerService { maps: Mutex::new(PlayerMaps::default()), password, sessions })
    }

    /// React to session termination by evicting the bound player, if any.
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) {
        let service = Arc::clone(self);
        bus.subscribe(move |Event::SessionTerminated(session)| {
            if let Some(player) = service.get_by_session(session.id()) {
                tracing::debug!(
                    username = %player.username,
                    session_id = %session.id(),
                    "session terminated, removing player"
                );
                service.kickoff(&player);
            }
        });
    }

    /// Authenticate a session into a player.
    ///
    /// Login is idempotent for the same session; a login from a different
    /// session kicks the existing player off and terminates its old session.
    pub fn login(
        &self,
        request: &LoginRequest,
        session: &Arc<Session>,
    ) -> Result<Arc<Player>, StatusError> {
        if request.password != self.password {
            return Err(StatusError::invalid_password());
        }

        let mut maps = self.maps.lock();

        if let Some(existing) = maps.by_user.get(&request.username).cloned() {
            if existing.session.id() == session.id() {
                return Ok(existing);
            }

            tracing::info!(
                username = %existing.username,
                old_session = %existing.session.id(),
                new_session = %session.id(),
                "username taken over from another session"
            );
            maps.remove(&existing);
            self.sessions.terminate(&existing.session);
        }

        // same session re-logging-in under a new name: unbind the old player
        if let Some(previous) = maps.by_session.remove(&session.id()) {
            maps.by_user.remove(&previous.username);
        }

        let player =
            Arc::new(Player { username: request.username.clone(), session: Arc::clone(session) });
        maps.insert(Arc::clone(&player));
        tracing::info!(username = %player.username, session_id = %session.id(), "player logged in");
        Ok(player)
    }

    /// Remove a player from both maps and terminate its session.
    pub fn kickoff(&self, player: &Arc<Player>) {
        let mut maps = self.maps.lock();
        maps.remove(player);
        self.sessions.terminate(&player.session);
        tracing::info!(
            username = %player.username,
            session_id = %player.session.id(),
            "player kicked off"
        );
    }

    pub fn get_by_user(&self, username: &str) -> Option<Arc<Player>> {
        self.maps.lock().by_user.get(username).cloned()
    }

    pub fn get_by_session(&self, session_id: Uuid) -> Option<Arc<Player>> {
        self.maps.lock().by_session.get(&session_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.maps.lock().by_user.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Conn, TransportKind};

    struct NullConn;

    impl Conn for NullConn {
        fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
        fn write_all(&self, _buf: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
        fn shutdown(&self) -> std::io::Result<()> {
            Ok(())
        }
        fn peer_addr(&self) -> Option<std::net::SocketAddr> {
            None
        }
        fn kind(&self) -> TransportKind {
            TransportKind::Tcp
        }
    }

    fn fixture() -> (Arc<SessionManager>, Arc<PlayerService>) {
        let sessions = Arc::new(SessionManager::new());
        let players = PlayerService::new("helloworld".to_string(), Arc::clone(&sessions));
        (sessions, players)
    }

    fn new_session(sessions: &SessionManager) -> Arc<Session> {
        let session = Arc::new(Session::new(Box::new(NullConn)));
        sessions.add(Arc::clone(&session)).unwrap();
        session
    }

    fn login_request(username: &str, password: &str) -> LoginRequest {
        LoginRequest { username: username.to_string(), password: password.to_string() }
    }

    #[test]
    fn wrong_password_registers_nothing() {
        let (sessions, players) = fixture();
        let session = new_session(&sessions);

        let err = players.login(&login_request("alice", "nope"), &session).unwrap_err();
        assert_eq!(err.code, 1000);
        assert!(players.get_by_user("alice").is_none());
        assert_eq!(players.count(), 0);
    }

    #[test]
    fn login_is_idempotent_per_session() {
        let (sessions, players) = fixture();
        let session = new_session(&sessions);

        let first = players.login(&login_request("alice", "helloworld"), &session).unwrap();
        let second = players.login(&login_request("alice", "helloworld"), &session).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(players.count(), 1);
        assert_eq!(players.get_by_session(session.id()).unwrap().username, "alice");
    }

    #[test]
    fn relogin_from_another_session_kicks_the_old_one() {
        let (sessions, players) = fixture();
        let session_a = new_session(&sessions);
        let session_b = new_session(&sessions);

        players.login(&login_request("bob", "helloworld"), &session_a).unwrap();
        players.login(&login_request("bob", "helloworld"), &session_b).unwrap();

        let bob = players.get_by_user("bob").unwrap();
        assert_eq!(bob.session.id(), session_b.id());
        assert!(sessions.get(session_a.id()).is_none(), "old session not terminated");
        assert!(session_a.is_closed());
        assert_eq!(players.count(), 1);
    }

    #[test]
    fn same_session_new_username_keeps_maps_in_lockstep() {
        let (sessions, players) = fixture();
        let session = new_session(&sessions);

        players.login(&login_request("alice", "helloworld"), &session).unwrap();
        players.login(&login_request("bob", "helloworld"), &session).unwrap();

        assert!(players.get_by_user("alice").is_none());
        assert_eq!(players.get_by_user("bob").unwrap().session.id(), session.id());
        assert_eq!(players.get_by_session(session.id()).unwrap().username, "bob");
        assert_eq!(players.count(), 1);
    }

    #[test]
    fn kickoff_removes_player_and_terminates_session() {
        let (sessions, players) = fixture();
        let session = new_session(&sessions);

        let player = players.login(&login_request("alice", "helloworld"), &session).unwrap();
        players.kickoff(&player);

        assert!(players.get_by_user("alice").is_none());
        assert!(players.get_by_session(session.id()).is_none());
        assert!(sessions.get(session.id()).is_none());
        assert!(session.is_closed());
    }

    #[test]
    fn session_terminated_event_evicts_the_player() {
        let (sessions, players) = fixture();
        let bus = EventBus::new();
        players.subscribe(&bus);

        let session = new_session(&sessions);
        players.login(&login_request("alice", "helloworld"), &session).unwrap();

        // simulate the sweeper: terminate, then publish with no locks held
        assert!(sessions.terminate(&session));
        bus.publish(&Event::SessionTerminated(Arc::clone(&session)));

        assert!(players.get_by_user("alice").is_none());
        assert_eq!(players.count(), 0);
    }
}
