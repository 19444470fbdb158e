//! Authorization Scenario Tests
//!
//! Drives the full strategy chain (path lists, attribute generation, static
//! rules and a recording backend) through `RequestAuthorizer`.

use async_trait::async_trait;
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Uri};
use kube_rbac_gate::auth::Identity;
use kube_rbac_gate::authz::builder::RequestAuthorizer;
use kube_rbac_gate::authz::rewrite::{
    NamedSource, RewriteAttributesConfig, SubjectAccessReviewRewrites,
};
use kube_rbac_gate::authz::static_rules::{StaticRule, UserMatch};
use kube_rbac_gate::authz::{
    Attributes, Authorizer, AuthzError, Decision, ErrorKind, RequestContext, ResourceAttributes,
    Verdict,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend that records every attribute set it sees.
///
/// Allows everything except the listed namespaces.
#[derive(Default)]
struct RecordingBackend {
    deny_namespaces: Vec<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Attributes>>,
}

impl RecordingBackend {
    fn denying(namespaces: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            deny_namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    fn calls(&self) -> Vec<Attributes> {
        self.calls.lock().unwrap().clone()
    }

    fn namespaces(&self) -> Vec<String> {
        self.calls().into_iter().map(|a| a.namespace).collect()
    }
}

#[async_trait]
impl Authorizer for RecordingBackend {
    async fn authorize(
        &self,
        _ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Decision, AuthzError> {
        self.calls.lock().unwrap().push(attributes.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny_namespaces.contains(&attributes.namespace) {
            Ok(Decision::deny(format!("namespace {} is off limits", attributes.namespace)))
        } else {
            Ok(Decision::allow("backend allowed"))
        }
    }
}

fn alice() -> Identity {
    Identity::new("alice", vec!["sre".to_string()])
}

fn bob() -> Identity {
    Identity::new("bob", vec!["dev".to_string()])
}

fn uri(raw: &str) -> Uri {
    raw.parse().unwrap()
}

fn by_query(name: &str, resource_attributes: ResourceAttributes) -> RewriteAttributesConfig {
    RewriteAttributesConfig {
        rewrites: Some(SubjectAccessReviewRewrites {
            by_query_parameter: Some(NamedSource { name: name.into() }),
            by_http_header: None,
        }),
        resource_attributes: Some(resource_attributes),
    }
}

fn namespaced_pods() -> ResourceAttributes {
    ResourceAttributes {
        namespace: "{{ .Value }}".into(),
        api_version: "v1".into(),
        resource: "pods".into(),
        ..Default::default()
    }
}

mod tests {
    use super::*;

    // ========================================================================
    // Path lists
    // ========================================================================

    #[tokio::test]
    async fn test_ignored_path_skips_backend() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .ignore_paths(vec!["/metrics".into()])
            .delegate(backend.clone())
            .build()
            .unwrap();

        let decision = authorizer
            .authorize_request(&alice(), "GET", &uri("/metrics"), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(decision.verdict, Verdict::Allow);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ignore_glob_does_not_cross_segments() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .ignore_paths(vec!["/debug/*".into()])
            .delegate(backend.clone())
            .build()
            .unwrap();

        let headers = HeaderMap::new();
        authorizer
            .authorize_request(&alice(), "GET", &uri("/debug/pprof"), &headers)
            .await
            .unwrap();
        assert!(backend.calls().is_empty());

        authorizer
            .authorize_request(&alice(), "GET", &uri("/debug/pprof/heap"), &headers)
            .await
            .unwrap();
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(backend.calls()[0].path, "/debug/pprof/heap");
    }

    #[tokio::test]
    async fn test_allow_list_miss_is_denied_without_backend() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .allow_paths(vec!["/metrics".into()])
            .delegate(backend.clone())
            .build()
            .unwrap();

        let decision = authorizer
            .authorize_request(&alice(), "GET", &uri("/api/v1/secrets"), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(decision.verdict, Verdict::Deny);
        assert!(decision.reason.contains("user=alice"));
        assert!(decision.reason.contains("path=/api/v1/secrets"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ignore_double_star_does_not_cross_segments() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .ignore_paths(vec!["/debug/**".into()])
            .delegate(backend.clone())
            .build()
            .unwrap();

        let headers = HeaderMap::new();
        authorizer
            .authorize_request(&alice(), "GET", &uri("/debug/pprof"), &headers)
            .await
            .unwrap();
        assert!(backend.calls().is_empty());

        authorizer
            .authorize_request(&alice(), "GET", &uri("/debug/a/b"), &headers)
            .await
            .unwrap();
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(backend.calls()[0].path, "/debug/a/b");
    }

    #[tokio::test]
    async fn test_ignore_negated_class() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .ignore_paths(vec!["/status/[^x]*".into()])
            .delegate(backend.clone())
            .build()
            .unwrap();

        let headers = HeaderMap::new();
        authorizer
            .authorize_request(&alice(), "GET", &uri("/status/ready"), &headers)
            .await
            .unwrap();
        assert!(backend.calls().is_empty());

        authorizer
            .authorize_request(&alice(), "GET", &uri("/status/xray"), &headers)
            .await
            .unwrap();
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(backend.calls()[0].path, "/status/xray");
    }

    #[tokio::test]
    async fn test_percent_encoded_path_is_decoded_before_matching() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .ignore_paths(vec!["/metrics".into()])
            .delegate(backend.clone())
            .build()
            .unwrap();

        let decision = authorizer
            .authorize_request(&alice(), "GET", &uri("/metric%73"), &HeaderMap::new())
            .await
            .unwrap();

        assert!(decision.is_allow());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_allow_list_hit_still_needs_backend() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .allow_paths(vec!["/metrics".into()])
            .delegate(backend.clone())
            .build()
            .unwrap();

        let decision = authorizer
            .authorize_request(&alice(), "GET", &uri("/metrics"), &HeaderMap::new())
            .await
            .unwrap();

        assert!(decision.is_allow());
        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].resource_request);
        assert_eq!(calls[0].path, "/metrics");
        assert_eq!(calls[0].user_name(), "alice");
    }

    #[tokio::test]
    async fn test_path_lists_are_exclusive() {
        let result = RequestAuthorizer::builder()
            .allow_paths(vec!["/a".into()])
            .ignore_paths(vec!["/b".into()])
            .build();

        assert!(matches!(result, Err(AuthzError::Config(_))));
    }

    // ========================================================================
    // Rewrites
    // ========================================================================

    #[tokio::test]
    async fn test_rewrite_denies_on_first_failing_namespace() {
        let backend = RecordingBackend::denying(&["ns2"]);
        let authorizer = RequestAuthorizer::builder()
            .rewrite(by_query("namespace", namespaced_pods()))
            .delegate(backend.clone())
            .build()
            .unwrap();

        let decision = authorizer
            .authorize_request(
                &bob(),
                "GET",
                &uri("/api?namespace=ns1&namespace=ns2&namespace=ns3"),
                &HeaderMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(decision.verdict, Verdict::Deny);
        assert!(decision.reason.contains("namespace=ns2"));
        assert_eq!(backend.namespaces(), vec!["ns1", "ns2"]);
    }

    #[tokio::test]
    async fn test_rewrite_allows_when_every_namespace_allows() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .rewrite(by_query("namespace", namespaced_pods()))
            .delegate(backend.clone())
            .build()
            .unwrap();

        let decision = authorizer
            .authorize_request(
                &bob(),
                "DELETE",
                &uri("/api?namespace=ns1&namespace=ns2"),
                &HeaderMap::new(),
            )
            .await
            .unwrap();

        assert!(decision.is_allow());
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        for call in &calls {
            assert!(call.resource_request);
            assert_eq!(call.resource, "pods");
            assert_eq!(call.api_version, "v1");
            assert_eq!(call.verb.as_str(), "delete");
            assert!(call.path.is_empty());
        }
    }

    #[tokio::test]
    async fn test_rewrite_from_header() {
        let backend = RecordingBackend::denying(&[]);
        let rewrite = RewriteAttributesConfig {
            rewrites: Some(SubjectAccessReviewRewrites {
                by_query_parameter: None,
                by_http_header: Some(NamedSource {
                    name: "X-Tenant".into(),
                }),
            }),
            resource_attributes: Some(namespaced_pods()),
        };
        let authorizer = RequestAuthorizer::builder()
            .rewrite(rewrite)
            .delegate(backend.clone())
            .build()
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.append("x-tenant", HeaderValue::from_static("team-a"));
        headers.append("x-tenant", HeaderValue::from_static("team-b"));

        let decision = authorizer
            .authorize_request(&bob(), "GET", &uri("/api"), &headers)
            .await
            .unwrap();

        assert!(decision.is_allow());
        assert_eq!(backend.namespaces(), vec!["team-a", "team-b"]);
    }

    #[tokio::test]
    async fn test_rewrite_without_values_is_malformed() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .rewrite(by_query("namespace", namespaced_pods()))
            .delegate(backend.clone())
            .build()
            .unwrap();

        let result = authorizer
            .authorize_request(&bob(), "GET", &uri("/api?other=1"), &HeaderMap::new())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, AuthzError::MalformedRequest));
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rewrites_without_resource_attributes_rejected() {
        let rewrite = RewriteAttributesConfig {
            rewrites: Some(SubjectAccessReviewRewrites {
                by_query_parameter: Some(NamedSource {
                    name: "namespace".into(),
                }),
                by_http_header: None,
            }),
            resource_attributes: None,
        };

        let result = RequestAuthorizer::builder().rewrite(rewrite).build();
        assert!(matches!(result, Err(AuthzError::Config(_))));
    }

    #[tokio::test]
    async fn test_ignore_list_sees_original_path_under_rewrites() {
        let backend = RecordingBackend::denying(&[]);
        let authorizer = RequestAuthorizer::builder()
            .ignore_paths(vec!["/healthz".into()])
            .rewrite(by_query("namespace", namespaced_pods()))
            .delegate(backend.clone())
            .build()
            .unwrap();

        // no namespace parameter, but the ignore list decides first
        let decision = authorizer
            .authorize_request(&bob(), "GET", &uri("/healthz"), &HeaderMap::new())
            .await
            .unwrap();

        assert!(decision.is_allow());
        assert!(backend.calls().is_empty());
    }

    // ========================================================================
    // Static rules
    // ========================================================================

    fn bound_prometheus_rules() -> RewriteAttributesConfig {
        RewriteAttributesConfig {
            rewrites: None,
            resource_attributes: Some(ResourceAttributes {
                namespace: "team-a".into(),
                api_group: "monitoring.coreos.com".into(),
                resource: "prometheusrules".into(),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_static_rule_allows_bound_target_without_backend() {
        let backend = RecordingBackend::denying(&["team-a"]);
        let authorizer = RequestAuthorizer::builder()
            .rewrite(bound_prometheus_rules())
            .static_rules(vec![StaticRule {
                resource: "prometheusrules".into(),
                resource_request: true,
                ..Default::default()
            }])
            .delegate(backend.clone())
            .build()
            .unwrap();

        let decision = authorizer
            .authorize_request(&alice(), "GET", &uri("/api/v1/rules"), &HeaderMap::new())
            .await
            .unwrap();

        assert!(decision.is_allow());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_static_rule_miss_falls_through_to_backend() {
        let backend = RecordingBackend::denying(&["team-a"]);
        let authorizer = RequestAuthorizer::builder()
            .rewrite(bound_prometheus_rules())
            .static_rules(vec![StaticRule {
                user: UserMatch {
                    name: "carol".into(),
                    groups: vec![],
                },
                resource: "prometheusrules".into(),
                resource_request: true,
                ..Default::default()
            }])
            .delegate(backend.clone())
            .build()
            .unwrap();

        let decision = authorizer
            .authorize_request(&alice(), "GET", &uri("/api/v1/rules"), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(decision.verdict, Verdict::Deny);
        assert_eq!(backend.namespaces(), vec!["team-a"]);
    }

    #[tokio::test]
    async fn test_no_opinion_anywhere_is_denied() {
        let authorizer = RequestAuthorizer::builder()
            .static_rules(vec![StaticRule {
                path: "/other".into(),
                ..Default::default()
            }])
            .build()
            .unwrap();

        let decision = authorizer
            .authorize_request(&alice(), "GET", &uri("/metrics"), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(decision.verdict, Verdict::Deny);
        assert!(!decision.reason.is_empty());
    }

    // ========================================================================
    // Deadlines
    // ========================================================================

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let backend = RecordingBackend::slow(Duration::from_secs(5));
        let authorizer = RequestAuthorizer::builder()
            .delegate(backend.clone())
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let result = authorizer
            .authorize_request(&alice(), "GET", &uri("/metrics"), &HeaderMap::new())
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(backend.calls().len(), 1);
    }
}
