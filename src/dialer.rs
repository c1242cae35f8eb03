//! Public dial entry point.
//!
//! A [`Dialer`] owns the asset snapshot and the connector and turns a covert
//! address into a connected phantom stream: derive keys, run the
//! registration fan-out, sleep a randomized interval to break the intraflow
//! signal, then dial the phantom and hand the connection to the caller.

use std::sync::Arc;

use tokio::time::Instant;

use crate::assets::AssetSource;
use crate::connector::{BoxedConn, Connector, TcpConnector};
use crate::error::{Error, Result};
use crate::registration::{self, Registration};
use crate::session::Session;
use crate::SessionConfig;

/// Dials Conjure sessions.
pub struct Dialer {
    config: SessionConfig,
    assets: Arc<dyn AssetSource>,
    connector: Arc<dyn Connector>,
}

impl Dialer {
    /// Create a dialer over an asset snapshot with default options.
    pub fn new(assets: Arc<dyn AssetSource>) -> Self {
        Self {
            config: SessionConfig::default(),
            assets,
            connector: Arc::new(TcpConnector),
        }
    }

    /// Replace the session options.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the connector; tests substitute network behavior here.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Build a session for `covert_address` and dial it.
    ///
    /// Cancellation is cooperative: dropping the returned future aborts at
    /// the next suspension point. Registrations already sent are not rolled
    /// back; the station tolerates unconsumed registrations.
    pub async fn dial(&self, covert_address: &str) -> Result<BoxedConn> {
        let session = Session::new(
            &self.config,
            Some(covert_address.to_owned()),
            &self.assets.station_pubkey(),
        )?;
        self.dial_session(Some(session)).await
    }

    /// Register an existing session and dial its phantom.
    pub async fn dial_session(&self, session: Option<Session>) -> Result<BoxedConn> {
        let Some(mut session) = session else {
            return Err(Error::NoSession);
        };
        let started = Instant::now();

        let reg = match registration::register(
            &mut session,
            self.assets.as_ref(),
            self.connector.clone(),
        )
        .await
        {
            Ok(reg) => reg,
            Err(err) => {
                tracing::trace!("{} failed to register: {}", session.id_string(), err);
                return Err(err);
            }
        };

        // A completed fan-out is a v6-support determination; remember it.
        self.assets.set_v6_support(reg.family);

        let to_sleep = reg.random_duration(3000, 212, 3449);
        tracing::trace!(
            "{} successfully sent registrations, sleeping for {:?}",
            session.id_string(),
            to_sleep
        );
        tokio::time::sleep(to_sleep).await;
        tracing::trace!("{} woke from sleep, connecting to phantom", session.id_string());

        let conn = self.connect_registration(&reg, &session, started).await?;
        Ok(conn)
    }

    async fn connect_registration(
        &self,
        reg: &Registration,
        session: &Session,
        started: Instant,
    ) -> Result<BoxedConn> {
        let conn = reg.connect(self.connector.as_ref()).await?;

        let total_ms = started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
        session.stats.lock().total_time_to_connect_ms = Some(total_ms);
        tracing::info!("{} {}", session.id_string(), reg.digest_stats());

        Ok(conn)
    }
}
