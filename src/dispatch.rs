use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::tuya::{Command, DeviceApi, TuyaError};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("infrared transmission failed: {0}")]
    Transmission(#[source] TuyaError),

    #[error("dispatch worker is gone")]
    WorkerGone,
}

/// What became of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The command went out over the session.
    Sent,
    /// Dropped: another command was already in flight and no session exists
    /// yet, so waiting would have stalled the caller on connection setup.
    Dropped,
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<(), TuyaError>>,
}

/// Serializes command delivery to one blaster.
///
/// Transmission is a blocking network round-trip, so it runs on a dedicated
/// worker thread, never on the async scheduler. The worker owns the session,
/// which is created lazily on the first command and reused for the process
/// lifetime. A single-slot queue in front of the worker keeps at most one
/// command in flight and one waiting.
pub struct Dispatcher {
    slot: mpsc::Sender<Request>,
    connected: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns the worker. `connect` is called from the worker thread when
    /// the first command arrives, and again only if that attempt failed.
    pub fn spawn<F>(mut connect: F) -> Self
    where
        F: FnMut() -> Result<Box<dyn DeviceApi>, TuyaError> + Send + 'static,
    {
        let (slot, mut requests) = mpsc::channel::<Request>(1);
        let connected = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&connected);
        let worker = std::thread::spawn(move || {
            let mut session: Option<Box<dyn DeviceApi>> = None;

            while let Some(Request { command, reply }) = requests.blocking_recv() {
                let result = match &mut session {
                    Some(api) => api.send(&command),
                    None => match connect() {
                        Ok(mut api) => {
                            info!("blaster session established");
                            flag.store(true, Ordering::Release);
                            let result = api.send(&command);
                            session = Some(api);
                            result
                        }
                        Err(err) => Err(err),
                    },
                };

                if let Err(err) = &result {
                    error!(%err, "infrared transmission failed");
                }
                // Caller may have given up waiting; that's fine.
                let _ = reply.send(result);
            }
        });

        Self {
            slot,
            connected,
            in_flight: Arc::new(AtomicUsize::new(0)),
            worker: Some(worker),
        }
    }

    /// Delivers one command, waiting for the transmission result.
    ///
    /// Once a session exists sends are strictly serialized: a later command
    /// queues behind the one in flight. Before the first session is up, a
    /// command that finds another already in flight is dropped instead, so
    /// commands never pile up behind a connection attempt.
    pub async fn send(&self, command: Command) -> Result<SendOutcome, DispatchError> {
        // Claim an in-flight slot first and decide on the prior count, so two
        // commands racing before the first connection can't both slip past
        // the check and stack up behind connection setup.
        let prior = self.in_flight.fetch_add(1, Ordering::AcqRel);
        if prior > 0 && !self.connected.load(Ordering::Acquire) {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            debug!("no session yet and a command is already in flight, dropping");
            return Ok(SendOutcome::Dropped);
        }

        let result = self.deliver(command).await;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result?;
        Ok(SendOutcome::Sent)
    }

    async fn deliver(&self, command: Command) -> Result<(), DispatchError> {
        let (reply, done) = oneshot::channel();
        self.slot
            .send(Request { command, reply })
            .await
            .map_err(|_| DispatchError::WorkerGone)?;
        done.await
            .map_err(|_| DispatchError::WorkerGone)?
            .map_err(DispatchError::Transmission)
    }

    /// Closes the queue and waits for the worker to drain.
    pub fn shutdown(mut self) {
        drop(self.slot);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records sent commands and flags any overlapping sends.
    #[derive(Clone, Default)]
    struct FakeDevice {
        sent: Arc<Mutex<Vec<Command>>>,
        in_flight: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
    }

    impl DeviceApi for FakeDevice {
        fn send(&mut self, command: &Command) -> Result<(), TuyaError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(20));
            self.sent.lock().unwrap().push(command.clone());
            self.in_flight.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    impl FakeDevice {
        fn dispatcher(&self) -> Dispatcher {
            let device = self.clone();
            Dispatcher::spawn(move || Ok(Box::new(device.clone()) as Box<dyn DeviceApi>))
        }
    }

    fn command(hex: &str) -> Command {
        Command::from_ir_code(hex).unwrap()
    }

    #[tokio::test]
    async fn sends_are_serialized_once_connected() {
        let device = FakeDevice::default();
        let dispatcher = device.dispatcher();

        // First command establishes the session.
        assert_eq!(
            dispatcher.send(command("01")).await.unwrap(),
            SendOutcome::Sent
        );

        let (a, b) = tokio::join!(
            dispatcher.send(command("02")),
            dispatcher.send(command("03")),
        );
        assert_eq!(a.unwrap(), SendOutcome::Sent);
        assert_eq!(b.unwrap(), SendOutcome::Sent);

        assert!(!device.overlapped.load(Ordering::SeqCst));
        assert_eq!(device.sent.lock().unwrap().len(), 3);
        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn command_dropped_while_first_session_still_pending() {
        // connect() blocks until released, keeping the first command in flight.
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let device = FakeDevice::default();
        let dispatcher = {
            let device = device.clone();
            Arc::new(Dispatcher::spawn(move || {
                gate.recv().unwrap();
                Ok(Box::new(device.clone()) as Box<dyn DeviceApi>)
            }))
        };

        let first = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.send(command("01")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            dispatcher.send(command("02")).await.unwrap(),
            SendOutcome::Dropped
        );

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), SendOutcome::Sent);
        assert_eq!(device.sent.lock().unwrap().len(), 1);

        // With the session up, nothing is dropped anymore.
        assert_eq!(
            dispatcher.send(command("03")).await.unwrap(),
            SendOutcome::Sent
        );

        if let Ok(dispatcher) = Arc::try_unwrap(dispatcher) {
            dispatcher.shutdown();
        }
    }

    #[tokio::test]
    async fn racing_first_commands_let_exactly_one_through() {
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let device = FakeDevice::default();
        let dispatcher = {
            let device = device.clone();
            Dispatcher::spawn(move || {
                gate.recv().unwrap();
                Ok(Box::new(device.clone()) as Box<dyn DeviceApi>)
            })
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            release.send(()).unwrap();
        });

        // Both issued before any session exists; whichever claims the
        // in-flight slot second must drop instead of queueing behind the
        // connection attempt.
        let (a, b) = tokio::join!(
            dispatcher.send(command("01")),
            dispatcher.send(command("02")),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert!(outcomes.contains(&SendOutcome::Sent));
        assert!(outcomes.contains(&SendOutcome::Dropped));
        assert_eq!(device.sent.lock().unwrap().len(), 1);
        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_transmission_error() {
        let dispatcher =
            Dispatcher::spawn(|| Err(TuyaError::BadCode(hex::FromHexError::OddLength)));

        let result = dispatcher.send(command("01")).await;
        assert!(matches!(result, Err(DispatchError::Transmission(_))));

        // The next command triggers a fresh connection attempt.
        let result = dispatcher.send(command("02")).await;
        assert!(matches!(result, Err(DispatchError::Transmission(_))));
        dispatcher.shutdown();
    }
}
