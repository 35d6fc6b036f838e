//! Signature database loading
//!
//! The database is a JSON object keyed by honeypot name. Key order in the
//! file is the evaluation order, so the map is read with order preserved.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

use honeysift_common::SignatureSet;

#[derive(Deserialize)]
struct SignatureFile {
    honeypots: Map<String, Value>,
    #[serde(default)]
    versions: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct SignatureDatabase {
    pub sets: Vec<SignatureSet>,
    pub versions: HashMap<String, String>,
}

pub fn load(path: &Path) -> Result<SignatureDatabase> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading signature file {}", path.display()))?;
    parse(&text).with_context(|| format!("parsing signature file {}", path.display()))
}

pub fn parse(text: &str) -> Result<SignatureDatabase> {
    let file: SignatureFile = serde_json::from_str(text)?;
    let mut sets = Vec::with_capacity(file.honeypots.len());
    for (name, value) in file.honeypots {
        let mut set: SignatureSet =
            serde_json::from_value(value).with_context(|| format!("honeypot {name}"))?;
        set.name = name;
        sets.push(set);
    }
    Ok(SignatureDatabase {
        sets,
        versions: file.versions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use honeysift_common::{MatchType, Payload, Protocol};

    const DATABASE: &str = r#"{
        "honeypots": {
            "kippo": {
                "protocol": "ssh",
                "steps": [
                    {"input": "uname -a", "output": "Linux svr03", "match_type": "fuzzy", "score": 0.6, "comment": "hostname"}
                ]
            },
            "conpot": {
                "protocol": "socket",
                "steps": [
                    {"input": [1, 2, 255], "output": [0, 1], "match_type": "precise", "score": 0.4}
                ]
            },
            "cowrie": {
                "protocol": "ssh",
                "custom_probes": ["session_isolation"]
            },
            "glastopf": {
                "protocol": "http",
                "steps": [
                    {"input": "/", "output": "Blog", "match_type": "fuzzy", "score": 0.5, "method": "get", "response_code": 200}
                ]
            }
        },
        "versions": {"kippo": "0.9"}
    }"#;

    #[test]
    fn file_order_is_evaluation_order() {
        let db = parse(DATABASE).unwrap();
        let names: Vec<&str> = db.sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["kippo", "conpot", "cowrie", "glastopf"]);
    }

    #[test]
    fn steps_and_payloads_are_decoded() {
        let db = parse(DATABASE).unwrap();
        let kippo = &db.sets[0];
        assert_eq!(kippo.protocol, Protocol::Ssh);
        assert_eq!(kippo.steps[0].weight, 0.6);
        assert_eq!(kippo.steps[0].match_type, MatchType::Fuzzy);
        assert_eq!(kippo.steps[0].comment, "hostname");

        let conpot = &db.sets[1];
        assert_eq!(conpot.steps[0].input, Payload::Binary(vec![1, 2, 255]));
        assert_eq!(conpot.steps[0].expected_output.as_bytes(), &[0, 1]);

        assert_eq!(db.sets[2].custom_probes, vec!["session_isolation".to_string()]);
        assert_eq!(db.sets[3].steps[0].response_code, Some(200));
        assert_eq!(db.versions.get("kippo").map(String::as_str), Some("0.9"));
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let text = r#"{"honeypots": {"x": {"protocol": "gopher"}}}"#;
        let err = parse(text).unwrap_err();
        assert!(format!("{err:#}").contains("honeypot x"));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signatures.json");
        std::fs::write(&path, DATABASE).unwrap();
        assert_eq!(load(&path).unwrap().sets.len(), 4);
        assert!(load(&dir.path().join("missing.json")).is_err());
    }
}
