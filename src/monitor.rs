/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The start/poll/stop job state machine for asynchronous device telemetry.

use crate::error::{ErrorKind, Result};
use crate::session::Session;
use crate::transport::Transport;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Active,
    Terminated,
}

/// A polling handle for one device's telemetry stream.
///
/// Robust to mid-session expiry: a `MonitorError` from the server during
/// [`MonitorJob::poll`] triggers an internal stop-then-start and the tick
/// returns `None`, rather than propagating the error — callers simply keep
/// polling on their normal cadence.
///
/// The work id returned by `monitor_start` is reused across ticks; it is
/// *not* re-requested on every poll (one source variant did this, but it is
/// considered a bug rather than the documented behavior).
pub struct MonitorJob<'a> {
    session: &'a Session,
    device_id: String,
    work_id: Option<String>,
    state: State,
}

impl<'a> MonitorJob<'a> {
    pub fn new(session: &'a Session, device_id: impl Into<String>) -> Self {
        MonitorJob {
            session,
            device_id: device_id.into(),
            work_id: None,
            state: State::Idle,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Idle -> Active. Calling `start` while already active is a no-op.
    pub fn start(&mut self, transport: &Transport) -> Result<()> {
        if self.state == State::Active {
            return Ok(());
        }
        let work_id = self.session.monitor_start(transport, &self.device_id)?;
        self.work_id = Some(work_id);
        self.state = State::Active;
        Ok(())
    }

    /// Any state -> Terminated. Best-effort; safe to call more than once.
    pub fn stop(&mut self, transport: &Transport) {
        if let Some(work_id) = self.work_id.take() {
            self.session.monitor_stop(transport, &self.device_id, &work_id);
        }
        self.state = State::Terminated;
    }

    /// Polls once. Returns `None` on warmup/no-data, or the decoded
    /// payload bytes. On a [`ErrorKind::MonitorError`] the job restarts
    /// (stop then start) internally and this tick yields `None`; the next
    /// call to `poll` proceeds against the fresh work id.
    pub fn poll(&mut self, transport: &Transport) -> Result<Option<Vec<u8>>> {
        if self.state != State::Active {
            self.start(transport)?;
        }
        let work_id = self.work_id.clone().expect("active state implies a work id");

        match self.session.monitor_poll(transport, &self.device_id, &work_id) {
            Ok(data) => Ok(data),
            Err(e) => match e.kind() {
                ErrorKind::MonitorError(failure) => {
                    warn!(
                        "monitor job for device {} restarting after error: {failure}",
                        self.device_id
                    );
                    self.stop(transport);
                    self.start(transport)?;
                    Ok(None)
                }
                _ => Err(e),
            },
        }
    }

    /// Runs `body` within a start/stop scope, guaranteeing `stop` is called
    /// on every exit path — including a panic unwinding through `body`.
    pub fn scoped<T>(
        mut self,
        transport: &Transport,
        body: impl FnOnce(&mut MonitorJob<'a>) -> T,
    ) -> Result<T> {
        self.start(transport)?;
        let guard = StopOnDrop {
            job: &mut self,
            transport,
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(guard.job)));
        drop(guard);
        result.unwrap_or_else(|payload| std::panic::resume_unwind(payload))
    }
}

/// Calls `stop` when dropped, including during unwind — this is what makes
/// [`MonitorJob::scoped`]'s guarantee hold even if `body` panics.
struct StopOnDrop<'a, 'b> {
    job: &'b mut MonitorJob<'a>,
    transport: &'b Transport,
}

impl<'a, 'b> Drop for StopOnDrop<'a, 'b> {
    fn drop(&mut self) {
        self.job.stop(self.transport);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthCredential;
    use crate::transport::TransportConfig;

    fn session_against(server_url: &str) -> Session {
        Session::new(
            AuthCredential {
                access_token: "AT".to_string(),
                refresh_token: "RT".to_string(),
                oauth_root: server_url.to_string(),
                user_number: None,
            },
            "SESSION1".to_string(),
            server_url.to_string(),
            None,
            "US".to_string(),
            "en-US".to_string(),
        )
    }

    #[test]
    fn restarts_on_monitor_error_and_returns_none() {
        let mut server = mockito::Server::new();
        let _start1 = server
            .mock("POST", "/rti/rtiMon")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"lgedmRoot":{"workId":"W1"}}"#)
            .create();
        let _poll_err = server
            .mock("POST", "/rti/rtiResult")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"lgedmRoot":{"returnCode":"0001"}}"#)
            .create();

        let transport = Transport::new(TransportConfig::default()).unwrap();
        let session = session_against(&server.url());
        let mut job = MonitorJob::new(&session, "dev1");
        job.start(&transport).unwrap();
        let result = job.poll(&transport).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn scoped_stops_even_on_panic() {
        let mut server = mockito::Server::new();
        let _start = server
            .mock("POST", "/rti/rtiMon")
            .match_body(mockito::Matcher::Regex("Start".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"lgedmRoot":{"workId":"W1"}}"#)
            .create();
        let stop_mock = server
            .mock("POST", "/rti/rtiMon")
            .match_body(mockito::Matcher::Regex("Stop".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"lgedmRoot":{}}"#)
            .create();

        let transport = Transport::new(TransportConfig::default()).unwrap();
        let session = session_against(&server.url());
        let job = MonitorJob::new(&session, "dev1");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            job.scoped(&transport, |_job| {
                panic!("boom");
            })
        }));
        assert!(result.is_err() || result.unwrap().is_err());
        stop_mock.assert();
    }
}
