// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration file loading

use medadvisor_core::{AmbiguityPolicy, EngineConfig, ErrorKind};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_from_toml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[intent]
confidence_threshold = 0.7
ambiguity = "pick_top"

[cache]
enabled = false
ttl_secs = 120

[neo4j]
uri = "http://graph.example:7474"
database = "medications"
"#
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.intent.confidence_threshold, 0.7);
    assert_eq!(config.intent.ambiguity, AmbiguityPolicy::PickTop);
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.ttl().map(|d| d.as_secs()), Some(120));
    assert_eq!(config.neo4j.database, "medications");
    assert_eq!(config.neo4j.username, "neo4j");
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.executor.timeout_ms, 5_000);
}

#[test]
fn test_malformed_file_is_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[cache\nmax_entries = ").unwrap();

    let err = EngineConfig::from_file(file.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[executor]\ntimeout_ms = 0").unwrap();

    let err = EngineConfig::load(Some(file.path().to_path_buf())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}
