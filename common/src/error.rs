use thiserror::Error;

/// Structural validation failure attributed to one element of the routing graph
///
/// The path lists the enclosing elements from the outside in, so the rendered
/// message reads like
/// `cluster "edge": ingresses[2]: ingress "web": http_upstream: port is required and must be greater than 0`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.path, .message))]
pub struct ValidationError {
    path: Vec<String>,
    message: String,
}

fn render(path: &[String], message: &str) -> String {
    let mut out = String::new();
    for segment in path {
        out.push_str(segment);
        out.push_str(": ");
    }
    out.push_str(message);
    out
}

impl ValidationError {
    /// Create an error for the element currently being validated
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    /// Prefix the path with an enclosing element
    pub fn within(mut self, segment: impl Into<String>) -> Self {
        self.path.insert(0, segment.into());
        self
    }

    /// Enclosing elements, outermost first
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The innermost failure, without the path
    pub fn message(&self) -> &str {
        &self.message
    }
}
