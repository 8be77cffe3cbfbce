use std::io::{self, Read};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("I/O error while fetching: {0}")]
    Io(#[from] io::Error),
    #[error("empty response body")]
    Empty,
    #[error("{0}")]
    Other(String),
}

/// Retrieves the payload of a key from the network.
///
/// Implemented for any `Fn(&str) -> Result<Vec<u8>, FetchError>`, which is
/// handy for stubs.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError>;
}

impl<F> Fetcher for F
where
    F: Fn(&str) -> Result<Vec<u8>, FetchError> + Send + Sync,
{
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        self(key)
    }
}

/// Reads a response body.
///
/// With a known `content_length` exactly that many bytes are read and a
/// shorter body is an error. Otherwise the body is read to the end. Either
/// way the buffer starts at no more than `initial_capacity` and grows with
/// the bytes actually received.
pub fn read_body<R: Read>(
    mut r: R,
    content_length: Option<u64>,
    initial_capacity: usize,
) -> Result<Vec<u8>, FetchError> {
    let body = match content_length {
        Some(0) => return Err(FetchError::Empty),
        Some(len) => {
            // the header is only a hint for the first allocation
            let capacity = usize::try_from(len).map_or(initial_capacity, |n| n.min(initial_capacity));
            let mut body = Vec::with_capacity(capacity);
            r.take(len).read_to_end(&mut body)?;
            if (body.len() as u64) < len {
                return Err(FetchError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("body ended after {} of {} bytes", body.len(), len),
                )));
            }
            body
        }
        None => {
            let mut body = Vec::with_capacity(initial_capacity);
            r.read_to_end(&mut body)?;
            body
        }
    };
    if body.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok(body)
}

#[cfg(feature = "http")]
pub use self::http::HttpFetcher;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use log::debug;
    use reqwest::blocking::Client;

    use super::{read_body, FetchError, Fetcher};
    use crate::cache::CacheConfig;

    /// Blocking HTTP fetcher
    pub struct HttpFetcher {
        client: Client,
        buffer_size: usize,
    }

    impl HttpFetcher {
        pub fn new(config: &CacheConfig) -> Result<HttpFetcher, FetchError> {
            let client = Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|err| FetchError::Other(err.to_string()))?;
            Ok(HttpFetcher {
                client,
                buffer_size: config.default_buffer_size,
            })
        }
    }

    impl Fetcher for HttpFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            let response = self
                .client
                .get(url)
                .send()
                .map_err(|err| FetchError::Other(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            let length = response.content_length();
            debug!("GET {} -> {} ({:?} bytes)", url, status, length);
            read_body(response, length, self.buffer_size)
        }
    }
}
