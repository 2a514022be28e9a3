// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};
use trendgrid_app::{RemoteCompletion, RemoteRequest, RemoteStore};
use trendgrid_tui::{GridRuntime, InternalEvent};

enum ReplyTo {
    Caller(Sender<RemoteCompletion>),
    Ui(Sender<InternalEvent>),
}

struct Job {
    request: RemoteRequest,
    reply_to: ReplyTo,
}

/// Owns the store on a dedicated thread so slow writes never block the UI.
/// Requests run one at a time in submission order.
pub struct StoreWorker {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl StoreWorker {
    pub fn spawn<S>(mut store: S) -> Result<Self>
    where
        S: RemoteStore + Send + 'static,
    {
        let (jobs, inbox) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("trendgrid-store".to_owned())
            .spawn(move || {
                for job in inbox {
                    let completion = job.request.execute(&mut store);
                    let delivered = match job.reply_to {
                        ReplyTo::Caller(tx) => tx.send(completion).is_ok(),
                        ReplyTo::Ui(tx) => tx.send(InternalEvent::Remote(completion)).is_ok(),
                    };
                    if !delivered {
                        debug!(id = %job.request.id(), "completion dropped; receiver gone");
                    }
                }
            })
            .context("spawn store worker thread")?;
        Ok(Self {
            jobs: Some(jobs),
            handle: Some(handle),
        })
    }

    fn submit(&self, request: RemoteRequest, reply_to: ReplyTo) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("store worker stopped"))?;
        jobs.send(Job { request, reply_to })
            .map_err(|_| anyhow!("store worker stopped"))
    }
}

impl GridRuntime for StoreWorker {
    fn execute(&mut self, request: &RemoteRequest) -> RemoteCompletion {
        let (tx, rx) = mpsc::channel();
        let outcome = self
            .submit(request.clone(), ReplyTo::Caller(tx))
            .and_then(|()| rx.recv().map_err(|_| anyhow!("store worker stopped")));
        match outcome {
            Ok(completion) => completion,
            Err(error) => {
                warn!(id = %request.id(), %error, "request failed before reaching the store");
                request.failed(error.to_string())
            }
        }
    }

    fn spawn_request(&mut self, request: RemoteRequest, tx: Sender<InternalEvent>) -> Result<()> {
        self.submit(request, ReplyTo::Ui(tx))
    }
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("store worker panicked");
        }
    }
}
