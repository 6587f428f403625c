//! Request dispatch

use tracing::{error, warn};

use crate::protocol::{Request, Response, Status};
use crate::sandbox::Sandbox;
use crate::server::Server;
use crate::server::reply::{ErrorReply, RunReply, SaveReply, Submission};
use crate::snippets::SnippetError;

const STATIC_INDEX: &str = "index.html";

impl<S: Sandbox> Server<S> {
    /// Produce the response for one framed request
    pub async fn route(&self, request: &Request) -> Response {
        match (request.method(), request.path()) {
            ("GET", "/" | "/index.html") => self.static_page().await,
            ("POST", "/run") => self.run_submission(request.body()).await,
            ("GET", "/load") => self.load_snippet(request.query_param("name")).await,
            ("POST", "/save") => {
                self.save_snippet(request.query_param("name"), request.body())
                    .await
            }
            _ => Response::text(Status::NotFound, "Not Found\n"),
        }
    }

    async fn static_page(&self) -> Response {
        let path = self.config().server.static_dir.join(STATIC_INDEX);
        match tokio::fs::read(&path).await {
            Ok(content) if !content.is_empty() => Response::html(content),
            _ => Response::text(Status::NotFound, format!("{STATIC_INDEX} not found.\n")),
        }
    }

    async fn run_submission(&self, body: &[u8]) -> Response {
        let submission: Submission = match serde_json::from_slice(body) {
            Ok(submission) => submission,
            Err(e) => {
                return Response::json(
                    Status::BadRequest,
                    &ErrorReply::new(format!("Invalid JSON: {e}")),
                );
            }
        };
        if submission.code.is_empty() {
            return Response::json(Status::BadRequest, &ErrorReply::new("Missing 'code'"));
        }

        let result = self
            .pipeline()
            .run(submission.code.as_bytes(), submission.input.as_bytes())
            .await;
        match result {
            Ok(result) => Response::json(Status::Ok, &RunReply::from(result)),
            Err(e) => {
                error!(error = %e, "submission failed");
                Response::json(
                    Status::InternalServerError,
                    &ErrorReply::new("internal error"),
                )
            }
        }
    }

    async fn load_snippet(&self, name: Option<&str>) -> Response {
        let snippets = self.snippets();
        let default_name = snippets.default_name();
        let name = name.unwrap_or(&default_name);

        match snippets.load(name).await {
            Ok(content) => Response::text(Status::Ok, content),
            Err(SnippetError::InvalidName(_)) => Response::text(
                Status::BadRequest,
                format!("Invalid filename. Use something like {default_name}\n"),
            ),
            Err(SnippetError::NotFound(_)) => {
                Response::text(Status::NotFound, format!("File not found: {name}\n"))
            }
            Err(e) => {
                warn!(error = %e, name, "failed to load snippet");
                Response::text(Status::InternalServerError, "Internal Server Error\n")
            }
        }
    }

    async fn save_snippet(&self, name: Option<&str>, content: &[u8]) -> Response {
        let snippets = self.snippets();
        let default_name = snippets.default_name();
        let name = name.unwrap_or(&default_name);

        match snippets.save(name, content).await {
            Ok(bytes) => Response::json(
                Status::Ok,
                &SaveReply {
                    ok: true,
                    saved_as: name,
                    bytes,
                },
            ),
            Err(SnippetError::InvalidName(_)) => Response::json(
                Status::BadRequest,
                &ErrorReply::new(format!(
                    "Invalid filename. Use something like {default_name}"
                )),
            ),
            Err(e) => {
                warn!(error = %e, name, "failed to save snippet");
                Response::json(
                    Status::InternalServerError,
                    &ErrorReply::new("Failed to open file for writing."),
                )
            }
        }
    }
}
