// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

//! Unified service tagging from a process environment.

use std::collections::HashMap;

use crate::types::StandardTags;

const SERVICE_PROPERTY: &str = "-Ddd.service=";

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// `service`, `env` and `version` entries of a `DD_TAGS` value. Entries may
/// be separated by commas or whitespace.
fn from_dd_tags(dd_tags: &str) -> StandardTags {
    let tags: Vec<String> = dd_tags
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    StandardTags::from_tags(&tags)
}

fn service_property<'a>(args: impl IntoIterator<Item = &'a str>) -> Option<String> {
    args.into_iter()
        .find_map(|arg| arg.strip_prefix(SERVICE_PROPERTY))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Standard tags of a process.
///
/// The `-Ddd.service` system property (on the command line or in
/// `JAVA_TOOL_OPTIONS`) wins over `DD_SERVICE`, which wins over a `service:`
/// entry in `DD_TAGS`. `env` and `version` follow the same order minus the
/// system property.
pub fn from_process(cmdline: &[String], envs: &HashMap<String, String>) -> StandardTags {
    let from_tags = envs
        .get("DD_TAGS")
        .map(|v| from_dd_tags(v))
        .unwrap_or_default();

    let property = service_property(cmdline.iter().map(String::as_str)).or_else(|| {
        envs.get("JAVA_TOOL_OPTIONS")
            .and_then(|opts| service_property(opts.split_whitespace()))
    });

    StandardTags {
        service: property
            .or_else(|| non_empty(envs.get("DD_SERVICE")))
            .or(from_tags.service),
        env: non_empty(envs.get("DD_ENV")).or(from_tags.env),
        version: non_empty(envs.get("DD_VERSION")).or(from_tags.version),
    }
}

/// Standard tags of a container from its environment only.
pub fn from_envs(envs: &HashMap<String, String>) -> StandardTags {
    from_process(&[], envs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_envs_all_fields_present() {
        let tags = from_envs(&envs(&[
            ("DD_SERVICE", "my-service"),
            ("DD_ENV", "production"),
            ("DD_VERSION", "1.2.3"),
        ]));
        assert_eq!(tags.service.as_deref(), Some("my-service"));
        assert_eq!(tags.env.as_deref(), Some("production"));
        assert_eq!(tags.version.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn test_system_property_beats_env_and_dd_tags() {
        let envs = envs(&[
            ("DD_SERVICE", "from-env"),
            ("DD_TAGS", "service:from-tags env:staging"),
        ]);
        let tags = from_process(&args(&["java", "-Ddd.service=from-prop", "-jar", "app.jar"]), &envs);
        assert_eq!(tags.service.as_deref(), Some("from-prop"));
        assert_eq!(tags.env.as_deref(), Some("staging"));
    }

    #[test]
    fn test_java_tool_options_property() {
        let envs = envs(&[
            ("JAVA_TOOL_OPTIONS", "-Xmx1g -Ddd.service=tool-opts"),
            ("DD_SERVICE", "from-env"),
        ]);
        let tags = from_process(&args(&["java", "-jar", "app.jar"]), &envs);
        assert_eq!(tags.service.as_deref(), Some("tool-opts"));
    }

    #[test]
    fn test_env_beats_dd_tags() {
        let tags = from_envs(&envs(&[
            ("DD_SERVICE", "from-env"),
            ("DD_TAGS", "service:from-tags,version:2"),
        ]));
        assert_eq!(tags.service.as_deref(), Some("from-env"));
        assert_eq!(tags.version.as_deref(), Some("2"));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let tags = from_process(
            &args(&["java", "-Ddd.service="]),
            &envs(&[("DD_SERVICE", ""), ("DD_TAGS", "service:fallback")]),
        );
        assert_eq!(tags.service.as_deref(), Some("fallback"));
        assert!(from_envs(&HashMap::new()).is_empty());
    }
}
