//! Canned fallback payloads for a small allow-list of dashboard-critical
//! endpoints, used only when both network and cache miss. The payloads are
//! fixed for compatibility with the clients that consume them.

use serde_json::{json, Value};

/// Look up a canned payload for a request path. Matching is by substring,
/// so query strings and id suffixes still hit.
pub fn lookup(path: &str) -> Option<Value> {
  if path.contains("dashboard/summary") {
    return Some(json!({
      "resumesCount": 0,
      "averageATSScore": 0,
      "lastAnalysisDate": null,
      "offline": true,
    }));
  }

  if path.contains("resumes") {
    return Some(json!({
      "resumes": [],
      "offline": true,
    }));
  }

  None
}
