use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};

use crate::{envelope::EventEnvelope, error::TransportError, DeliveryClient, Error, Result};

const MIN_BATCH_SIZE: usize = 1;
/// Largest batch accepted by a single Firehose request.
const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct ExportWorkerConfig {
    /// Maximum number of envelopes shipped in one batch. Clamped to `1..=500`.
    pub batch_size: usize,
    /// Number of envelopes that may wait for delivery. Envelopes submitted to a full queue are
    /// dropped.
    pub queue_capacity: usize,
}

impl Default for ExportWorkerConfig {
    fn default() -> Self {
        ExportWorkerConfig {
            batch_size: 100,
            queue_capacity: 10_000,
        }
    }
}

enum Message {
    Envelope(EventEnvelope),
    Stop,
}

/// A cloneable handle used to submit envelopes to an [`ExportWorker`].
#[derive(Clone)]
pub struct ExportHandle {
    sender: SyncSender<Message>,
}

impl ExportHandle {
    /// Queue `envelope` for delivery without blocking.
    ///
    /// The envelope is dropped if the queue is full or the worker has stopped.
    pub fn submit(&self, envelope: EventEnvelope) -> std::result::Result<(), TransportError> {
        self.sender
            .try_send(Message::Envelope(envelope))
            .map_err(|err| match err {
                TrySendError::Full(_) => TransportError::QueueFull,
                TrySendError::Disconnected(_) => TransportError::Unavailable,
            })
    }
}

/// A background thread that ships envelopes in batches.
///
/// Envelopes reach the stream in batches, so there is no ordering guarantee relative to other
/// exporters writing to the same stream.
pub struct ExportWorker {
    join_handle: std::thread::JoinHandle<()>,
    handle: ExportHandle,
}

impl ExportWorker {
    pub fn start(client: DeliveryClient, config: ExportWorkerConfig) -> Result<ExportWorker> {
        let batch_size = config.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        let (sender, receiver) = mpsc::sync_channel(config.queue_capacity.max(1));

        let join_handle = std::thread::Builder::new()
            .name("experiment-export".to_owned())
            .spawn(move || run(client, receiver, batch_size))?;

        Ok(ExportWorker {
            join_handle,
            handle: ExportHandle { sender },
        })
    }

    pub fn handle(&self) -> ExportHandle {
        self.handle.clone()
    }

    /// Ask the worker to stop once envelopes queued so far are delivered.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited). Ignoring it as there's nothing
        // useful we can do.
        let _ = self.handle.sender.send(Message::Stop);
    }

    /// Stop the worker and block until queued envelopes are delivered and the thread exits.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::ExportWorkerPanicked)?;

        Ok(())
    }
}

fn run(client: DeliveryClient, receiver: Receiver<Message>, batch_size: usize) {
    log::debug!(target: "experiment_firehose",
                stream_name = client.stream_name(),
                batch_size;
                "export worker started");

    loop {
        let first = match receiver.recv() {
            Ok(Message::Envelope(envelope)) => envelope,
            Ok(Message::Stop) | Err(_) => break,
        };

        let mut batch = vec![first];
        let mut stop = false;
        while batch.len() < batch_size {
            match receiver.try_recv() {
                Ok(Message::Envelope(envelope)) => batch.push(envelope),
                Ok(Message::Stop) => {
                    stop = true;
                    break;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        if let [envelope] = batch.as_slice() {
            client.put_record(envelope);
        } else {
            client.put_batch(&batch);
        }

        if stop {
            break;
        }
    }

    log::debug!(target: "experiment_firehose", "export worker stopped");
}
