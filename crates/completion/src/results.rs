//! Turns the row picked in the selector back into command-line text.

use kfzf_core::ResourceType;
use tracing::debug;

use crate::parse::{explicit_namespace, parse_flag_and_resource, FlagCompletion, INLINE_FLAGS};
use crate::CompletionError;

/// `row` is a line of the formatted completion output. Api resource, namespace and
/// cluster-scoped rows start with the value; other rows start with the namespace.
pub fn process_result<S: AsRef<str>>(verb: &str, args: &[S], row: &str, current_namespace: &str) -> Result<String, CompletionError> {
    let fields: Vec<&str> = row.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(CompletionError::InvalidResult(row.to_string()));
    }
    let (rt, flag) = parse_flag_and_resource(verb, args)?;
    debug!(resource = %rt, flag = %flag, row, current_namespace, "processing selection");

    if rt == ResourceType::ApiResource {
        return Ok(fields[0].to_string());
    }
    let (row_namespace, mut value) = if rt == ResourceType::Namespace || !rt.is_namespaced() {
        (None, fields[0].to_string())
    } else {
        (Some(fields[0]), fields[1].to_string())
    };

    if let Some(last) = args.last().map(AsRef::as_ref).filter(|l| INLINE_FLAGS.contains(l)) {
        value = format!("{}{}", last, value);
    }
    let Some(row_namespace) = row_namespace else { return Ok(value) };
    if flag == FlagCompletion::Namespace {
        return Ok(value);
    }
    if explicit_namespace(args) == Some(row_namespace) {
        return Ok(value);
    }
    if row_namespace != current_namespace {
        return Ok(format!("{} -n {}", value, row_namespace));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POD_ROW: &str = "kube-system\tcoredns-6d4b75cb6d-m6m4q\t172.17.0.3\t192.168.49.2\tminikube\tRunning\tBurstable\tcoredns\tCriticalAddonsOnly:\tNone\t6d\tk8s-app=kube-dns";
    const NS_ROW: &str = "default\t30d\tkubernetes.io/metadata.name=default";
    const LABEL_ROW: &str = "kube-system\ttier=control-plane\t4";

    fn check(verb: &str, args: &[&str], row: &str, current: &str, expected: &str) {
        let got = process_result(verb, args, row, current).unwrap();
        assert_eq!(got, expected, "{verb} {args:?} / {row}");
    }

    #[test]
    fn pod_rows_inject_namespace_when_needed() {
        check("get", &["pods", " "], POD_ROW, "kube-system", "coredns-6d4b75cb6d-m6m4q");
        check("get", &["pods", "--namespace", "kube-system", ""], POD_ROW, "default", "coredns-6d4b75cb6d-m6m4q");
        check("get", &["pods", "-nkube-system", ""], POD_ROW, "default", "coredns-6d4b75cb6d-m6m4q");
        check("get", &["pods", ""], POD_ROW, "default", "coredns-6d4b75cb6d-m6m4q -n kube-system");
        check("get", &["pods", "c"], POD_ROW, "default", "coredns-6d4b75cb6d-m6m4q -n kube-system");
        check("exec", &["-ti", ""], "kfzf\tkfzf-collector-0\t10.0.0.1", "default", "kfzf-collector-0 -n kfzf");
    }

    #[test]
    fn namespace_rows() {
        check("get", &["pods", "-n="], NS_ROW, "default", "-n=default");
        check("get", &["pods", "-n"], NS_ROW, "kube-system", "-ndefault");
        check("get", &["pods", "-n", " "], NS_ROW, "kube-system", "default");
        check("get", &["pods", "--namespace="], NS_ROW, "kube-system", "--namespace=default");
    }

    #[test]
    fn label_rows_keep_the_flag() {
        check("get", &["pods", "-l="], LABEL_ROW, "default", "-l=tier=control-plane -n kube-system");
        check("get", &["pods", "-l", " "], LABEL_ROW, "default", "tier=control-plane -n kube-system");
        check("get", &["pods", "-l"], LABEL_ROW, "default", "-ltier=control-plane -n kube-system");
        check("get", &["pods", "--selector="], LABEL_ROW, "kube-system", "--selector=tier=control-plane");
        check("get", &["nodes", "-l"], "beta.kubernetes.io/arch=amd64\t1", "default", "-lbeta.kubernetes.io/arch=amd64");
    }

    #[test]
    fn field_selector_rows() {
        check("get", &["pods", "--field-selector="], "kube-system\tspec.nodeName=minikube\t7", "default", "--field-selector=spec.nodeName=minikube -n kube-system");
    }

    #[test]
    fn api_resource_rows_use_first_field() {
        check("get", &[" "], "deployments.apps\tdeploy\tapps/v1\ttrue\tDeployment", "default", "deployments.apps");
    }

    #[test]
    fn cluster_scoped_rows_never_get_a_namespace() {
        check("get", &["nodes", ""], "minikube\tcontrol-plane\tReady", "default", "minikube");
    }

    #[test]
    fn malformed_or_unmanaged_input() {
        assert!(matches!(process_result("get", &["pods", ""], "lonely", "default"), Err(CompletionError::InvalidResult(_))));
        assert!(matches!(process_result("get", &["pods", "-t"], POD_ROW, "default"), Err(CompletionError::UnmanagedFlag(_))));
    }
}
