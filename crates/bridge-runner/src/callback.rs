use crate::error::{BridgeError, Result};
use serde::Deserialize;

/// The only acknowledgment code that means the grade was recorded.
pub const SUCCESS_CODE: i64 = 1;

const BODY_EXCERPT: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallbackAck {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Grade payload posted to the LMS.
#[derive(Debug, Clone)]
pub struct GradeSubmission<'a> {
    pub score: i64,
    pub feedback: &'a str,
}

impl GradeSubmission<'_> {
    fn form(&self) -> [(&'static str, String); 4] {
        let score = self.score.to_string();
        [
            ("grade", score.clone()),
            ("points", score),
            ("feedback", self.feedback.to_string()),
            ("format", "html".to_string()),
        ]
    }
}

/// Posts the grade once; any answer other than [`SUCCESS_CODE`] is fatal.
pub fn submit(url: &str, submission: &GradeSubmission<'_>) -> Result<CallbackAck> {
    tracing::info!(score = submission.score, "Submit results to Codio");
    let client = reqwest::blocking::Client::new();
    let response = client.post(url).form(&submission.form()).send()?;
    let status = response.status().as_u16();
    let body = response.text()?;
    tracing::debug!(status, body = %body, "callback answered");

    let ack: CallbackAck = serde_json::from_str(&body).map_err(|_| BridgeError::BadAcknowledgment {
        status,
        body: body.chars().take(BODY_EXCERPT).collect(),
    })?;
    if ack.code != SUCCESS_CODE {
        return Err(BridgeError::Rejected {
            code: ack.code,
            message: ack.message,
        });
    }
    tracing::info!(message = %ack.message, "Done");
    Ok(ack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;

    /// Answers exactly one request with `reply` and hands back the form body.
    fn one_shot_server(reply: &'static str) -> (String, thread::JoinHandle<String>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
        let addr = server.server_addr().to_ip().expect("ip listener");
        let handle = thread::spawn(move || {
            let mut request = server.recv().expect("request");
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body).expect("body");
            let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("header");
            request
                .respond(tiny_http::Response::from_string(reply).with_header(header))
                .expect("respond");
            body
        });
        (format!("http://{}/grade", addr), handle)
    }

    #[test]
    fn posts_form_and_accepts_success_code() {
        let (url, handle) = one_shot_server(r#"{"code": 1, "message": "ok"}"#);
        let ack = submit(
            &url,
            &GradeSubmission {
                score: 87,
                feedback: "<p>fine</p>",
            },
        )
        .expect("submit");
        assert_eq!(ack.message, "ok");

        let body = handle.join().expect("server thread");
        assert!(body.contains("grade=87"));
        assert!(body.contains("points=87"));
        assert!(body.contains("format=html"));
        assert!(body.contains("feedback=%3Cp%3Efine%3C%2Fp%3E"));
    }

    #[test]
    fn rejection_surfaces_remote_message() {
        let (url, handle) = one_shot_server(r#"{"code": 2, "message": "bad token"}"#);
        let err = submit(&url, &GradeSubmission { score: 10, feedback: "" }).expect_err("rejected");
        handle.join().expect("server thread");
        assert!(matches!(err, BridgeError::Rejected { code: 2, ref message } if message == "bad token"));
        assert_eq!(err.to_string(), "Response 2: bad token");
    }

    #[test]
    fn unparseable_acknowledgment_is_transport_error() {
        let (url, handle) = one_shot_server("<html>gateway timeout</html>");
        let err = submit(&url, &GradeSubmission { score: 10, feedback: "" }).expect_err("garbage");
        handle.join().expect("server thread");
        assert!(matches!(err, BridgeError::BadAcknowledgment { status: 200, .. }));
    }

    #[test]
    fn unreachable_callback_is_http_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let err = submit(
            &format!("http://{}/grade", addr),
            &GradeSubmission { score: 1, feedback: "" },
        )
        .expect_err("nobody listening");
        assert!(matches!(err, BridgeError::Http(_)));
    }
}
