//! JSON bodies exchanged on the HTTP surface

use serde::{Deserialize, Serialize};

use crate::types::PipelineResult;

/// Body of `POST /run`
#[derive(Debug, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub input: String,
}

/// Reply to `POST /run` once the pipeline has produced a result
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RunReply {
    Completed {
        ok: bool,
        exit_code: i32,
        timed_out: bool,
        output: String,
    },
    CompileFailed {
        ok: bool,
        stage: &'static str,
        output: String,
    },
}

impl From<PipelineResult> for RunReply {
    fn from(result: PipelineResult) -> Self {
        match result {
            PipelineResult::Completed {
                exit_status,
                timed_out,
                output,
            } => RunReply::Completed {
                ok: true,
                exit_code: exit_status,
                timed_out,
                output: sanitize_output(&output),
            },
            PipelineResult::CompileFailed { output } => RunReply::CompileFailed {
                ok: false,
                stage: "compile",
                output: sanitize_output(&output),
            },
        }
    }
}

/// Reply to a successful `POST /save`
#[derive(Debug, Serialize)]
pub struct SaveReply<'a> {
    pub ok: bool,
    #[serde(rename = "savedAs")]
    pub saved_as: &'a str,
    pub bytes: usize,
}

/// `{"ok":false,"error":...}`
#[derive(Debug, Serialize)]
pub struct ErrorReply {
    pub ok: bool,
    pub error: String,
}

impl ErrorReply {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }
}

/// Make captured process output safe to embed as a JSON string.
///
/// Invalid UTF-8 is replaced, and control characters other than newline,
/// carriage return and tab are dropped. Escaping of what remains is left
/// to the serializer.
pub fn sanitize_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c >= ' ' || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}
