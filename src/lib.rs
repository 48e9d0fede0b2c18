/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![warn(rust_2018_idioms)]

//! A client for a gateway-discovery / OAuth2 / monitor-polling smart
//! appliance cloud API.
//!
//! Typical use: discover the gateway for a country/language, send the user
//! through [`GatewayEndpoints::oauth_url`], exchange the callback URL for an
//! [`AuthCredential`] with [`Client::from_callback_url`], then call
//! [`Client::devices`] and [`Client::model_info`] to drive a device.

pub mod auth;
pub mod device;
pub mod error;
pub mod gateway;
pub mod model_info;
pub mod monitor;
pub mod session;
pub mod signature;
pub mod state;
pub mod transport;
mod util;

pub use crate::auth::AuthCredential;
pub use crate::device::{DeviceDescriptor, DeviceType};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::gateway::GatewayEndpoints;
pub use crate::model_info::ModelSchema;
pub use crate::monitor::MonitorJob;
pub use crate::session::{ConfigCategory, Session};
pub use crate::state::PersistedState;
pub use crate::transport::{Transport, TransportConfig};

use parking_lot::Mutex;
use std::collections::HashMap;

/// The top-level facade: owns the transport, the current gateway/session,
/// and a cache of fetched model-info documents.
///
/// `Client` is `Send` but not `Sync` in spirit: [`Session`] isn't
/// internally synchronized, so concurrent calls against the same session
/// must be serialized by the caller. The one exception is [`Client::refresh`],
/// which is guarded by an internal mutex so that an overlapping refresh
/// triggered from two call sites doesn't race to install two different
/// sessions.
pub struct Client {
    transport: Transport,
    gateway: Option<GatewayEndpoints>,
    auth: Option<AuthCredential>,
    session: Option<Session>,
    devices: Vec<DeviceDescriptor>,
    model_info_cache: HashMap<String, serde_json::Value>,
    country: String,
    language: String,
    refresh_lock: Mutex<()>,
}

impl Client {
    /// Builds a client with the default transport configuration.
    pub fn new(country: impl Into<String>, language: impl Into<String>) -> Result<Self> {
        Self::with_transport_config(country, language, TransportConfig::default())
    }

    pub fn with_transport_config(
        country: impl Into<String>,
        language: impl Into<String>,
        config: TransportConfig,
    ) -> Result<Self> {
        Ok(Client {
            transport: Transport::new(config)?,
            gateway: None,
            auth: None,
            session: None,
            devices: Vec::new(),
            model_info_cache: HashMap::new(),
            country: country.into(),
            language: language.into(),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Lazily discovers the gateway for this client's (country, language).
    pub fn gateway(&mut self) -> Result<&GatewayEndpoints> {
        if self.gateway.is_none() {
            let gw = GatewayEndpoints::discover(&self.transport, &self.country, &self.language)?;
            self.gateway = Some(gw);
        }
        Ok(self.gateway.as_ref().expect("just set"))
    }

    /// Completes login from the browser redirect URL and establishes a
    /// session against the discovered gateway.
    pub fn from_callback_url(&mut self, redirected_url: &str) -> Result<()> {
        let gateway = self.gateway()?.clone();
        let auth = AuthCredential::from_callback_url(&self.transport, &gateway, redirected_url)?;
        self.install_auth(auth, &gateway)
    }

    /// Resumes a session directly from an already-issued refresh token,
    /// skipping the browser login step.
    pub fn from_refresh_token(&mut self, refresh_token: impl Into<String>) -> Result<()> {
        let gateway = self.gateway()?.clone();
        let auth = AuthCredential {
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            oauth_root: gateway.oauth_root.clone(),
            user_number: None,
        };
        let refreshed = auth.refresh(&self.transport)?;
        self.install_auth(refreshed, &gateway)
    }

    fn install_auth(&mut self, auth: AuthCredential, gateway: &GatewayEndpoints) -> Result<()> {
        let (session, devices) =
            auth.start_session(&self.transport, gateway, &self.country, &self.language)?;
        self.auth = Some(auth);
        self.session = Some(session);
        self.devices = devices;
        Ok(())
    }

    /// Replaces the access token and re-establishes the session. Safe to
    /// call from more than one caller concurrently: only one refresh is
    /// ever in flight, and the others observe its result.
    pub fn refresh(&mut self) -> Result<()> {
        let _guard = self.refresh_lock.lock();
        let gateway = self.gateway()?.clone();
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| ErrorKind::TokenError("no credential to refresh".to_string()))?
            .clone();
        let refreshed = auth.refresh(&self.transport)?;
        self.install_auth(refreshed, &gateway)
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| ErrorKind::NotLoggedIn("no active session".to_string()).into())
    }

    /// The device list fetched at login. Call [`Client::refresh_devices`] to
    /// re-fetch after a device has been paired or removed.
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn refresh_devices(&mut self) -> Result<&[DeviceDescriptor]> {
        let devices = self.session()?.get_devices(&self.transport)?;
        self.devices = devices;
        Ok(&self.devices)
    }

    /// Looks up a device by id from the currently cached list. Never
    /// returns a device other than the one asked for.
    pub fn get_device(&self, device_id: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Fetches (and caches, by `model_info_url`) the schema document for a
    /// device descriptor.
    pub fn model_info(&mut self, descriptor: &DeviceDescriptor) -> Result<ModelSchema> {
        let raw = match self.model_info_cache.get(&descriptor.model_info_url) {
            Some(cached) => cached.clone(),
            None => {
                let doc: serde_json::Value = self
                    .transport
                    .get_json(&descriptor.model_info_url, &[])?;
                self.model_info_cache
                    .insert(descriptor.model_info_url.clone(), doc.clone());
                doc
            }
        };
        ModelSchema::parse(raw)
    }

    /// Opens a [`MonitorJob`] for `device_id` against the current session.
    pub fn monitor(&self, device_id: impl Into<String>) -> Result<MonitorJob<'_>> {
        Ok(MonitorJob::new(self.session()?, device_id))
    }

    /// Snapshots everything needed to resume without re-authenticating.
    pub fn dump(&self) -> PersistedState {
        PersistedState {
            gateway: self.gateway.clone(),
            auth: self.auth.clone(),
            session_id: self.session.as_ref().map(|s| s.session_id().to_string()),
            model_info_cache: self.model_info_cache.clone(),
            country: Some(self.country.clone()),
            language: Some(self.language.clone()),
        }
    }

    /// Restores a client from a previously [`Client::dump`]ed state. Does
    /// not itself re-validate the session against the server; the first
    /// authenticated call will surface a stale session as a typed error.
    pub fn load(state: PersistedState, config: TransportConfig) -> Result<Self> {
        let country = state.country.unwrap_or_default();
        let language = state.language.unwrap_or_default();
        let mut client = Client::with_transport_config(country, language, config)?;
        client.gateway = state.gateway;
        client.model_info_cache = state.model_info_cache;
        if let (Some(auth), Some(gateway)) = (state.auth, client.gateway.clone()) {
            let session_id = state.session_id.unwrap_or_default();
            client.session = Some(Session::new(
                auth.clone(),
                session_id,
                gateway.api_root.clone(),
                gateway.api2_root.clone(),
                client.country.clone(),
                client.language.clone(),
            ));
            client.auth = Some(auth);
        }
        Ok(client)
    }
}
