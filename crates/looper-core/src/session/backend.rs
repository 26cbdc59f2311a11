//! Registry of sessions and drivers
//!
//! Drivers are created here and stay owned by the backend until they are
//! attached to a session, which then owns them for good.

use std::sync::{Arc, Mutex};

use super::{lock, Session};
use crate::audio::{create_driver, AudioMidiDriver};
use crate::config::EngineConfig;
use crate::engine::arena::{Arena, DriverKey, SessionKey};
use crate::error::{LooperError, LooperResult};

pub struct Backend {
    config: EngineConfig,
    sessions: Mutex<Arena<SessionKey, Arc<Session>>>,
    drivers: Mutex<Arena<DriverKey, Box<dyn AudioMidiDriver>>>,
}

impl Backend {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(Arena::new()),
            drivers: Mutex::new(Arena::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_session(&self) -> LooperResult<SessionKey> {
        let session = Session::new(self.config.clone())?;
        let key = lock(&self.sessions).insert(Arc::new(session));
        log::info!("Created {}", key);
        Ok(key)
    }

    pub fn session(&self, key: SessionKey) -> LooperResult<Arc<Session>> {
        lock(&self.sessions)
            .get(key)
            .cloned()
            .ok_or(LooperError::Expired("session"))
    }

    pub fn sessions(&self) -> Vec<SessionKey> {
        lock(&self.sessions).keys().collect()
    }

    /// Forget a session; it shuts down once the last handle is dropped
    pub fn destroy_session(&self, key: SessionKey) -> LooperResult<()> {
        lock(&self.sessions)
            .remove(key)
            .map(drop)
            .ok_or(LooperError::Expired("session"))?;
        log::info!("Destroyed {}", key);
        Ok(())
    }

    /// Create a driver from the configured backend
    ///
    /// An unavailable JACK server falls back to the dummy driver.
    pub fn create_driver(&self) -> DriverKey {
        self.add_driver(create_driver(&self.config.driver))
    }

    pub fn add_driver(&self, driver: Box<dyn AudioMidiDriver>) -> DriverKey {
        let key = lock(&self.drivers).insert(driver);
        log::debug!("Registered {}", key);
        key
    }

    /// Move a registered driver into a session
    pub fn attach_driver(&self, session: SessionKey, driver: DriverKey) -> LooperResult<()> {
        let session = self.session(session)?;
        let driver = lock(&self.drivers)
            .remove(driver)
            .ok_or(LooperError::Expired("driver"))?;
        session.set_driver(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DummyDriver;
    use crate::types::PortDirection;

    fn backend() -> Backend {
        Backend::new(EngineConfig {
            buffer_size: 16,
            pool_buffers: 8,
            pool_low_water: 2,
            reserved_loop_samples: 1024,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn test_session_lifecycle() {
        let backend = backend();
        let key = backend.create_session().unwrap();
        assert_eq!(backend.sessions(), vec![key]);
        let session = backend.session(key).unwrap();
        session.add_loop().unwrap();

        backend.destroy_session(key).unwrap();
        assert!(matches!(backend.session(key), Err(LooperError::Expired("session"))));
        assert!(backend.destroy_session(key).is_err());
        // Handles already given out keep working
        assert_eq!(session.loops().len(), 1);
    }

    #[test]
    fn test_attach_driver_moves_it() {
        let backend = backend();
        let session = backend.create_session().unwrap();
        let driver = backend.add_driver(Box::new(DummyDriver::controlled(8)));

        backend.attach_driver(session, driver).unwrap();
        let session_handle = backend.session(session).unwrap();
        assert!(session_handle.has_driver());
        assert!(session_handle
            .open_audio_port("in", PortDirection::Input)
            .is_ok());

        assert!(matches!(
            backend.attach_driver(session, driver),
            Err(LooperError::Expired("driver"))
        ));
    }
}
