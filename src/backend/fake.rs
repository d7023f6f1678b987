//! Scripted in-memory backend for tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{EnvironmentSpec, IsolationBackend, OutputChunk, OutputStream};
use crate::language::INPUT_FILE;

/// What every environment created by a `FakeBackend` does.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Print the given output and exit with `code`.
    Exit {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        code: i64,
    },
    /// Echo the workspace's stdin file to stdout after `delay`, exit 0.
    EchoStdin { delay: Duration },
    /// Never produce output or exit.
    Hang,
    /// Like `Hang`, and the runtime refuses to kill the environment.
    HangFailKill,
    FailCreate,
    FailAttach,
    FailStart,
    FailWait,
}

impl Behavior {
    pub fn exit(stdout: &str, code: i64) -> Self {
        Self::Exit {
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
            code,
        }
    }
}

#[derive(Debug)]
struct Env {
    host_dir: PathBuf,
    stdout: Vec<u8>,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    started: AtomicUsize,
    killed: AtomicUsize,
    removed: AtomicUsize,
    /// Removals that happened while the workspace directory still existed.
    removed_before_workspace_teardown: AtomicUsize,
}

/// Backend whose environments follow one [`Behavior`].
#[derive(Debug, Clone)]
pub struct FakeBackend {
    behavior: Behavior,
    counters: Arc<Counters>,
    envs: Arc<Mutex<HashMap<String, Env>>>,
    last_spec: Arc<Mutex<Option<EnvironmentSpec>>>,
}

impl FakeBackend {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            counters: Arc::default(),
            envs: Arc::default(),
            last_spec: Arc::default(),
        }
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    pub fn killed(&self) -> usize {
        self.counters.killed.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.counters.removed.load(Ordering::SeqCst)
    }

    pub fn removed_before_workspace_teardown(&self) -> usize {
        self.counters
            .removed_before_workspace_teardown
            .load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> Option<EnvironmentSpec> {
        self.last_spec.lock().unwrap().clone()
    }

    fn env_stdout(&self, id: &str) -> Vec<u8> {
        self.envs
            .lock()
            .unwrap()
            .get(id)
            .map(|env| env.stdout.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl IsolationBackend for FakeBackend {
    async fn create(&self, spec: &EnvironmentSpec) -> Result<String> {
        if matches!(self.behavior, Behavior::FailCreate) {
            anyhow::bail!("no such image: {}", spec.image);
        }
        let n = self.counters.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("fake-{n}");

        let stdout = match &self.behavior {
            Behavior::Exit { stdout, .. } => stdout.clone(),
            // The workspace must already be populated when the environment is provisioned.
            Behavior::EchoStdin { .. } => std::fs::read(spec.host_dir.join(INPUT_FILE))?,
            _ => Vec::new(),
        };
        self.envs.lock().unwrap().insert(
            id.clone(),
            Env {
                host_dir: spec.host_dir.clone(),
                stdout,
            },
        );
        *self.last_spec.lock().unwrap() = Some(spec.clone());
        Ok(id)
    }

    async fn attach(&self, id: &str) -> Result<OutputStream> {
        match &self.behavior {
            Behavior::FailAttach => anyhow::bail!("attach refused"),
            Behavior::Hang | Behavior::HangFailKill => Ok(stream::pending().boxed()),
            Behavior::Exit { stderr, .. } => {
                let chunks = vec![
                    Ok(OutputChunk::Stdout(self.env_stdout(id))),
                    Ok(OutputChunk::Stderr(stderr.clone())),
                ];
                Ok(stream::iter(chunks).boxed())
            }
            Behavior::EchoStdin { delay } => {
                let stdout = self.env_stdout(id);
                let delay = *delay;
                Ok(stream::once(async move {
                    tokio::time::sleep(delay).await;
                    Ok(OutputChunk::Stdout(stdout))
                })
                .boxed())
            }
            _ => Ok(stream::empty().boxed()),
        }
    }

    async fn start(&self, _id: &str) -> Result<()> {
        if matches!(self.behavior, Behavior::FailStart) {
            anyhow::bail!("OCI runtime create failed");
        }
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&self, _id: &str) -> Result<i64> {
        match &self.behavior {
            Behavior::Exit { code, .. } => Ok(*code),
            Behavior::EchoStdin { delay } => {
                tokio::time::sleep(*delay).await;
                Ok(0)
            }
            Behavior::FailWait => anyhow::bail!("connection reset while waiting"),
            _ => std::future::pending().await,
        }
    }

    async fn kill(&self, _id: &str) -> Result<()> {
        self.counters.killed.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior, Behavior::HangFailKill) {
            anyhow::bail!("cannot kill container: permission denied");
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        if let Some(env) = self.envs.lock().unwrap().remove(id) {
            if env.host_dir.exists() {
                self.counters
                    .removed_before_workspace_teardown
                    .fetch_add(1, Ordering::SeqCst);
            }
        }
        self.counters.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
