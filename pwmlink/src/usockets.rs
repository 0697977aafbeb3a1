use std::{
    fs::remove_file,
    io::{BufRead, BufReader, ErrorKind, Read, Write},
    net::Shutdown,
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::debug;

use crate::{Command, Error, Reply, Result, MAX_LINE_LEN, MAX_REPLY_LEN};

/// How long a server connection may take to deliver its request
const SERVER_READ_TIMEOUT: Duration = Duration::from_secs(1);

pub type Handler = Arc<dyn Fn(&str) -> String + Send + Sync>;

fn map_timeout(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(e),
    }
}

/// Answers one request line per connection with whatever `handler` returns.
pub struct LineServer {
    pub errors: Arc<Mutex<Vec<Error>>>,
    pub join_handle: JoinHandle<()>,
}

impl LineServer {
    pub fn spawn(path: impl AsRef<Path>, handler: Handler) -> Result<Self> {
        let path = path.as_ref();

        // remove a socket left behind by a previous run
        if path.exists() {
            remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        let errors: Arc<Mutex<Vec<Error>>> = Arc::new(Mutex::new(Vec::new()));

        let error_cpy = errors.clone();

        let join_handle = thread::spawn(move || {
            for stream in listener.incoming() {
                let handler = handler.clone();
                let error_cpy = error_cpy.clone();

                match stream {
                    Ok(stream) => {
                        thread::spawn(move || {
                            if let Err(e) = Self::serve(stream, handler.as_ref()) {
                                error_cpy
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .push(e);
                            }
                        });
                    }
                    Err(e) => {
                        error_cpy
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(e.into());
                    }
                }
            }
        });

        Ok(Self {
            errors,
            join_handle,
        })
    }

    fn serve(stream: UnixStream, handler: &(dyn Fn(&str) -> String + Send + Sync)) -> Result<()> {
        stream.set_read_timeout(Some(SERVER_READ_TIMEOUT))?;

        let mut line = String::new();
        BufReader::new((&stream).take(MAX_LINE_LEN))
            .read_line(&mut line)
            .map_err(map_timeout)?;

        let line = line.trim();

        if line.is_empty() {
            return Ok(());
        }

        debug!(request = line, "line server request");

        let reply = handler(line);

        (&stream).write_all(reply.as_bytes())?;
        stream.shutdown(Shutdown::Both).unwrap_or_default();

        Ok(())
    }

    pub fn pop_error(&mut self) -> Option<Error> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }
}

/// One request per connection, every step bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct LineClient {
    path: PathBuf,
    timeout: Duration,
}

impl LineClient {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn request(&self, line: &str) -> Result<String> {
        let mut stream = UnixStream::connect(&self.path)?;

        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        stream.write_all(line.as_bytes()).map_err(map_timeout)?;
        stream.write_all(b"\n").map_err(map_timeout)?;
        stream.shutdown(Shutdown::Write)?;

        let mut reply = String::new();
        (&mut stream)
            .take(MAX_REPLY_LEN)
            .read_to_string(&mut reply)
            .map_err(map_timeout)?;

        Ok(reply.trim().to_owned())
    }
}

/// Client side of the relay daemon protocol.
#[derive(Debug, Clone)]
pub struct PwmClient {
    link: LineClient,
}

impl PwmClient {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            link: LineClient::new(path, timeout),
        }
    }

    pub fn send(&self, command: &Command) -> Result<Reply> {
        self.link.request(&command.to_string())?.parse()
    }

    #[inline]
    pub fn ping(&self) -> Result<Reply> {
        self.send(&Command::Ping)
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        matches!(self.ping(), Ok(Reply::IsAlive))
    }
}
