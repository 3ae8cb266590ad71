use std::collections::VecDeque;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::transport::{RunRequest, Transport};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Guard that snapshots and restores environment variables, serialized
/// across tests through a process-wide lock.
pub struct EnvGuard {
    _lock: MutexGuard<'static, ()>,
    original_vars: Vec<(String, Option<OsString>)>,
}

impl EnvGuard {
    pub fn clear(keys: &[&str]) -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut guard = Self {
            _lock: lock,
            original_vars: Vec::new(),
        };
        for key in keys {
            guard.record_original(key);
            env::remove_var(key);
        }
        guard
    }

    pub fn set(&mut self, key: &str, value: impl AsRef<OsStr>) {
        self.record_original(key);
        env::set_var(key, value);
    }

    fn record_original(&mut self, key: &str) {
        if self.original_vars.iter().any(|(k, _)| k == key) {
            return;
        }
        self.original_vars.push((key.to_string(), env::var_os(key)));
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.original_vars.drain(..) {
            if let Some(value) = value {
                env::set_var(key, value);
            } else {
                env::remove_var(key);
            }
        }
    }
}

const TMUX_STUB_SCRIPT: &str = r#"#!/bin/sh
cmd="$1"
shift

if [ -n "${TMUX_STUB_SLEEP:-}" ]; then
  sleep "$TMUX_STUB_SLEEP"
fi

if [ "${TMUX_STUB_FORCE_ERROR:-}" = "1" ] || [ "${TMUX_STUB_ERROR_CMD:-}" = "$cmd" ]; then
  echo "${TMUX_STUB_ERROR_MSG:-stub error}" 1>&2
  exit 1
fi

case "$cmd" in
  argv-echo)
    printf '%s\n' "$@"
    ;;
  ssh-test)
    if [ "${TMUX_STUB_SSH_SEEN:-}" = "1" ]; then
      printf "%s" "via-ssh"
    else
      echo "missing ssh" 1>&2
      exit 1
    fi
    ;;
  list-sessions)
    printf '%b' "${TMUX_STUB_LIST_SESSIONS:-\$0\talpha\t2\t1\t1700000000\n\$1\tbeta\t1\t0\t1700000100}"
    ;;
  list-windows)
    printf '%b' "${TMUX_STUB_LIST_WINDOWS:-alpha\t@1\t0\tfirst\t1\t1\t*\nalpha\t@2\t1\tsecond\t0\t1\t-}"
    ;;
  list-panes)
    printf '%b' "${TMUX_STUB_LIST_PANES:-alpha\t0\t%1\t0\t1\t/dev/ttys000\tzsh\tpane-one\nalpha\t0\t%2\t1\t0\t/dev/ttys001\tzsh\tpane-two}"
    ;;
  has-session)
    if [ "${TMUX_STUB_HAS_SESSION:-1}" = "1" ]; then
      exit 0
    fi
    echo "can't find session" 1>&2
    exit 1
    ;;
  capture-pane)
    if [ -n "${TMUX_STUB_CAPTURE_COUNT_FILE:-}" ]; then
      count=0
      if [ -f "$TMUX_STUB_CAPTURE_COUNT_FILE" ]; then
        count=$(cat "$TMUX_STUB_CAPTURE_COUNT_FILE" 2>/dev/null || echo 0)
      fi
      count=$((count+1))
      printf '%s' "$count" > "$TMUX_STUB_CAPTURE_COUNT_FILE"
      eval "printf '%b' \"\${TMUX_STUB_CAPTURE_$count:-${TMUX_STUB_CAPTURE_OUTPUT:-stub-output}}\""
    else
      printf '%b' "${TMUX_STUB_CAPTURE_OUTPUT:-stub-output}"
    fi
    ;;
  display-message)
    printf '%b' "${TMUX_STUB_DISPLAY_OUTPUT:-120}"
    ;;
  new-session)
    ;;
  new-window)
    printf '%b' "${TMUX_STUB_NEW_WINDOW_NAME:-new-window}"
    ;;
  split-window)
    ;;
  send-keys)
    if [ -n "${TMUX_STUB_SEND_KEYS_LOG:-}" ]; then
      printf '%s\n' "send-keys $*" >> "$TMUX_STUB_SEND_KEYS_LOG"
    fi
    ;;
  run-shell)
    sh -c "$1"
    ;;
  pipe-pane|kill-session|kill-window|kill-pane|rename-session|rename-window|select-window|select-pane|select-layout|set-window-option)
    ;;
  *)
    echo "unknown command: $cmd" 1>&2
    exit 1
    ;;
esac
"#;

const SSH_STUB_SCRIPT: &str = r#"#!/bin/sh
if [ "$1" = "-T" ]; then
  shift
fi
dest="$1"
shift
export TMUX_STUB_SSH_SEEN=1
if [ "$1" = "cat" ]; then
  exec cat "$2"
fi
exec sh -c "$*"
"#;

/// Substitutes `tmux` and `ssh` on PATH with controllable shell scripts.
pub struct BinStub {
    _lock: MutexGuard<'static, ()>,
    _dir: TempDir,
    original_vars: Vec<(String, Option<OsString>)>,
}

impl BinStub {
    pub fn new() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().expect("create temp dir");
        write_executable(&dir.path().join("tmux"), TMUX_STUB_SCRIPT);
        write_executable(&dir.path().join("ssh"), SSH_STUB_SCRIPT);

        let mut stub = Self {
            _lock: lock,
            _dir: dir,
            original_vars: Vec::new(),
        };

        let mut path = OsString::new();
        path.push(stub._dir.path());
        path.push(OsStr::new(":"));
        if let Some(existing) = env::var_os("PATH") {
            path.push(existing);
        }
        stub.set_var("PATH", path);
        stub.remove_var("TMUX_STUB_FORCE_ERROR");
        stub.remove_var("TMUX_STUB_ERROR_CMD");
        stub.remove_var("TMUX_STUB_ERROR_MSG");
        stub.remove_var("TMUX_STUB_SLEEP");
        stub.remove_var("TMUX_STUB_SSH_SEEN");
        stub.remove_var("TMUX_STUB_CAPTURE_COUNT_FILE");
        stub.remove_var("TMUX_STUB_CAPTURE_OUTPUT");

        stub
    }

    pub fn set_var(&mut self, key: &str, value: impl AsRef<OsStr>) {
        self.record_original(key);
        env::set_var(key, value);
    }

    pub fn remove_var(&mut self, key: &str) {
        self.record_original(key);
        env::remove_var(key);
    }

    fn record_original(&mut self, key: &str) {
        if self.original_vars.iter().any(|(k, _)| k == key) {
            return;
        }
        self.original_vars.push((key.to_string(), env::var_os(key)));
    }
}

impl Drop for BinStub {
    fn drop(&mut self) {
        for (key, value) in self.original_vars.drain(..) {
            if let Some(value) = value {
                env::set_var(key, value);
            } else {
                env::remove_var(key);
            }
        }
    }
}

fn write_executable(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write stub script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("stat stub").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod stub");
    }
}

// ----------------------------------------------------------------------
// Recording fake transport
// ----------------------------------------------------------------------

/// One recorded transport invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub host: Option<String>,
    pub bin: String,
    pub path_add: Vec<String>,
    pub args: Vec<String>,
}

#[derive(Debug)]
enum Scripted {
    Ok(String),
    Fail(String),
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<RecordedCall>,
    queue: VecDeque<Scripted>,
    sticky_output: String,
    failing_hosts: Vec<(String, String)>,
}

/// In-memory transport that records every argv and replays scripted
/// outputs. When the script queue is exhausted it keeps returning the last
/// queued output, which lets polling loops run indefinitely.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Queue one successful output.
    pub fn push_output(&self, output: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.queue.push_back(Scripted::Ok(output.into()));
    }

    /// Queue one failure.
    pub fn fail_next(&self, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.queue.push_back(Scripted::Fail(message.into()));
    }

    /// Fail every call routed to `host`.
    pub fn fail_for_host(&self, host: impl Into<String>, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.failing_hosts.push((host.into(), message.into()));
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall {
            host: req.host.clone(),
            bin: req.bin.clone(),
            path_add: req.path_add.clone(),
            args: req.args.clone(),
        });
        if let Some(host) = &req.host {
            if let Some((_, message)) = state.failing_hosts.iter().find(|(h, _)| h == host) {
                return Err(Error::transport(message.clone(), "", ""));
            }
        }
        match state.queue.pop_front() {
            Some(Scripted::Ok(output)) => {
                state.sticky_output = output.clone();
                Ok(output)
            }
            Some(Scripted::Fail(message)) => Err(Error::transport(message, "", "")),
            None => Ok(state.sticky_output.clone()),
        }
    }
}

/// Build a `TmuxClient` wired to a fresh fake transport.
pub fn client_with_fake() -> (crate::ops::TmuxClient, FakeTransport) {
    use std::time::Duration;

    let fake = FakeTransport::default();
    let client = crate::ops::TmuxClient::new(
        Arc::new(fake.clone()),
        "tmux",
        Vec::new(),
        Duration::from_secs(5),
        Arc::new(crate::target::HostProfiles::default()),
    );
    (client, fake)
}
