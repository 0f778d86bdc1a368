//! Command-line inspection: which flag is being completed and which resource type it targets.

use std::fmt;

use kfzf_core::ResourceType;
use tracing::debug;

use crate::CompletionError;

/// The flag whose value is being completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagCompletion {
    Label,
    FieldSelector,
    Namespace,
    None,
    /// A flag this engine cannot complete; the shell should take over.
    Unmanaged,
}

impl fmt::Display for FlagCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlagCompletion::Label => "Label",
            FlagCompletion::FieldSelector => "FieldSelector",
            FlagCompletion::Namespace => "Namespace",
            FlagCompletion::None => "None",
            FlagCompletion::Unmanaged => "Unmanaged",
        };
        f.write_str(s)
    }
}

/// Flag tokens that are prepended verbatim to a selected value.
pub const INLINE_FLAGS: [&str; 7] = ["-l=", "-l", "--field-selector=", "--selector=", "-n=", "--namespace=", "-n"];

/// Split a raw command line on whitespace. A trailing space becomes a `" "` token so that
/// "cursor after a space" differs from "cursor at the end of a word".
pub fn prepare_cmd_args(line: &str) -> Vec<String> {
    let mut args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if line.ends_with(' ') {
        args.push(" ".to_string());
    }
    args
}

// flag still waiting for its value, cursor right after it
fn last_flag(arg: &str) -> FlagCompletion {
    match arg {
        "-l" | "-l=" | "--selector=" => FlagCompletion::Label,
        "-n" | "-n=" | "--namespace=" => FlagCompletion::Namespace,
        "--field-selector=" => FlagCompletion::FieldSelector,
        _ => FlagCompletion::Unmanaged,
    }
}

// flag followed by the token being typed
fn previous_flag(arg: &str) -> FlagCompletion {
    match arg {
        "-l" | "--selector" => FlagCompletion::Label,
        "--field-selector" => FlagCompletion::FieldSelector,
        "-n" | "--namespace" => FlagCompletion::Namespace,
        _ => FlagCompletion::None,
    }
}

pub fn check_flag_managed<S: AsRef<str>>(args: &[S]) -> FlagCompletion {
    let Some(last) = args.last().map(AsRef::as_ref) else { return FlagCompletion::None };
    if args.iter().any(|a| a.as_ref() == ">") {
        return FlagCompletion::Unmanaged;
    }
    if last.starts_with('-') {
        return last_flag(last);
    }
    match args.len().checked_sub(2).map(|i| args[i].as_ref()) {
        Some(prev) if prev.starts_with('-') => previous_flag(prev),
        _ => FlagCompletion::None,
    }
}

/// `logs` and `exec` always target pods; a bare verb completes resource type names.
pub fn resource_type_for<S: AsRef<str>>(verb: &str, args: &[S]) -> ResourceType {
    if verb == "logs" || verb == "exec" {
        return ResourceType::Pod;
    }
    if args.len() <= 1 {
        return ResourceType::ApiResource;
    }
    args.iter()
        .map(|a| ResourceType::parse(a.as_ref()))
        .find(|rt| *rt != ResourceType::Unknown)
        .unwrap_or(ResourceType::Unknown)
}

pub fn parse_flag_and_resource<S: AsRef<str>>(verb: &str, args: &[S]) -> Result<(ResourceType, FlagCompletion), CompletionError> {
    let flag = check_flag_managed(args);
    if flag == FlagCompletion::Unmanaged {
        return Err(CompletionError::UnmanagedFlag(join(args)));
    }
    if flag == FlagCompletion::Namespace {
        return Ok((ResourceType::Namespace, flag));
    }
    let rt = resource_type_for(verb, args);
    debug!(verb, resource = %rt, flag = %flag, "parsed command");
    if rt == ResourceType::Unknown {
        return Err(CompletionError::UnknownResource(join(args)));
    }
    Ok((rt, flag))
}

/// Namespace given with `-n X`, `--namespace X` or `--namespace=X`.
pub fn parse_namespace_from_args<S: AsRef<str>>(args: &[S]) -> Option<&str> {
    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        if arg == "-n" || arg == "--namespace" {
            if let Some(next) = args.get(i + 1) {
                return Some(next.as_ref());
            }
        }
        if let Some(ns) = arg.strip_prefix("--namespace=") {
            return Some(ns);
        }
    }
    None
}

/// Like [`parse_namespace_from_args`], also accepting the `-nX` and `-n=X` short forms.
pub fn explicit_namespace<S: AsRef<str>>(args: &[S]) -> Option<&str> {
    if let Some(ns) = parse_namespace_from_args(args) {
        return Some(ns);
    }
    args.iter().find_map(|a| {
        let rest = a.as_ref().strip_prefix("-n")?;
        let rest = rest.strip_prefix('=').unwrap_or(rest);
        (!rest.is_empty()).then_some(rest)
    })
}

fn join<S: AsRef<str>>(args: &[S]) -> String { args.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ") }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_keeps_trailing_space() {
        assert_eq!(prepare_cmd_args("get pods"), vec!["get", "pods"]);
        assert_eq!(prepare_cmd_args("get pods "), vec!["get", "pods", " "]);
        assert!(prepare_cmd_args("").is_empty());
    }

    #[test]
    fn unmanaged_flags() {
        for args in [vec!["-t"], vec!["-i"], vec!["--field-selector"], vec!["--selector"], vec!["--all-namespaces"], vec!["pods", "aPod", ">", "/tmp"]] {
            assert_eq!(check_flag_managed(&args), FlagCompletion::Unmanaged, "{args:?}");
        }
    }

    #[test]
    fn managed_flags() {
        let cases: Vec<(Vec<&str>, FlagCompletion)> = vec![
            (vec!["pods", "--selector", ""], FlagCompletion::Label),
            (vec!["pods", "--selector="], FlagCompletion::Label),
            (vec!["pods", "-l"], FlagCompletion::Label),
            (vec!["pods", "-l="], FlagCompletion::Label),
            (vec!["pods", "--field-selector", ""], FlagCompletion::FieldSelector),
            (vec!["pods", "--field-selector="], FlagCompletion::FieldSelector),
            (vec!["pods", "--all-namespaces", ""], FlagCompletion::None),
            (vec!["pods", "-t", ""], FlagCompletion::None),
            (vec!["pods", "-i", ""], FlagCompletion::None),
            (vec!["pods", "-ti", ""], FlagCompletion::None),
            (vec!["pods", "-it", ""], FlagCompletion::None),
            (vec!["-n"], FlagCompletion::Namespace),
            (vec!["-n="], FlagCompletion::Namespace),
            (vec!["-n", " "], FlagCompletion::Namespace),
            (vec!["--namespace", ""], FlagCompletion::Namespace),
            (vec!["pods", ""], FlagCompletion::None),
            (vec![], FlagCompletion::None),
        ];
        for (args, expected) in cases {
            assert_eq!(check_flag_managed(&args), expected, "{args:?}");
        }
    }

    #[test]
    fn resource_type_detection() {
        assert_eq!(resource_type_for("logs", &[""]), ResourceType::Pod);
        assert_eq!(resource_type_for("exec", &["-ti", ""]), ResourceType::Pod);
        assert_eq!(resource_type_for("get", &[" "]), ResourceType::ApiResource);
        assert_eq!(resource_type_for::<&str>("get", &[]), ResourceType::ApiResource);
        assert_eq!(resource_type_for("get", &["po", ""]), ResourceType::Pod);
        assert_eq!(resource_type_for("get", &["-l", "svc", ""]), ResourceType::Service);
        assert_eq!(resource_type_for("get", &["foo", "bar"]), ResourceType::Unknown);
    }

    #[test]
    fn unmanaged_wins_over_unknown_resource() {
        let err = parse_flag_and_resource("get", &["--field-selector"]).unwrap_err();
        assert!(matches!(err, CompletionError::UnmanagedFlag(_)));
        assert!(err.is_fallthrough());

        let err = parse_flag_and_resource("get", &["foo", "bar"]).unwrap_err();
        assert!(matches!(err, CompletionError::UnknownResource(_)));
    }

    #[test]
    fn namespace_flag_forces_namespace_type() {
        assert_eq!(parse_flag_and_resource("get", &["pods", "-n", ""]).unwrap(), (ResourceType::Namespace, FlagCompletion::Namespace));
        assert_eq!(parse_flag_and_resource("logs", &["--namespace="]).unwrap(), (ResourceType::Namespace, FlagCompletion::Namespace));
    }

    #[test]
    fn namespace_from_args() {
        assert_eq!(parse_namespace_from_args(&["pods", "-n", "kube-system", ""]), Some("kube-system"));
        assert_eq!(parse_namespace_from_args(&["pods", "--namespace=kfzf", ""]), Some("kfzf"));
        assert_eq!(parse_namespace_from_args(&["pods", "-nkube-system", ""]), None);
        assert_eq!(explicit_namespace(&["pods", "-nkube-system", ""]), Some("kube-system"));
        assert_eq!(explicit_namespace(&["pods", "-n=kfzf", ""]), Some("kfzf"));
        assert_eq!(explicit_namespace(&["pods", "-n="]), None);
        assert_eq!(explicit_namespace(&["pods", ""]), None);
    }
}
