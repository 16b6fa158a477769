use crate::error::{ScenarioError, Z6Error};
use crate::scenario::model::{RequestSpec, Scenario};

/// Bounds enforced on any scenario the core accepts.
pub const MAX_SCENARIO_VUS: u32 = 10_000;
pub const MAX_SCENARIO_REQUESTS: usize = 1000;

/// Validate a [`Scenario`] and return a list of validation errors.
///
/// An empty `Vec` means the scenario is valid.
pub fn validate(scenario: &Scenario) -> Vec<Z6Error> {
    let mut errors = Vec::new();

    if scenario.runtime.duration_seconds == 0 {
        errors.push(invalid("runtime.duration_seconds must be at least 1"));
    }
    if scenario.runtime.vus == 0 || scenario.runtime.vus > MAX_SCENARIO_VUS {
        errors.push(invalid(&format!(
            "runtime.vus must be in 1..={MAX_SCENARIO_VUS} (got {})",
            scenario.runtime.vus
        )));
    }

    if scenario.target.host.trim().is_empty() {
        errors.push(Z6Error::Scenario(ScenarioError::MissingRequiredField(
            "target.host".to_string(),
        )));
    }
    if scenario.target.port == 0 {
        errors.push(invalid("target.port must be nonzero"));
    }
    if scenario.target.tls {
        // No TLS transport exists; reject rather than silently run plaintext.
        errors.push(invalid("target.tls is not supported"));
    }

    if scenario.requests.is_empty() {
        errors.push(Z6Error::Scenario(ScenarioError::MissingRequiredField(
            "requests".to_string(),
        )));
    }
    if scenario.requests.len() > MAX_SCENARIO_REQUESTS {
        errors.push(Z6Error::Scenario(ScenarioError::TooManyRequests));
    }

    for req in &scenario.requests {
        errors.extend(validate_request(req));
    }

    if let Some(rate) = scenario.assertions.error_rate_max {
        if !(0.0..=1.0).contains(&rate) {
            errors.push(invalid("assertions.error_rate_max must be in [0, 1]"));
        }
    }
    if let Some(rate) = scenario.assertions.success_rate_min {
        if !(0.0..=1.0).contains(&rate) {
            errors.push(invalid("assertions.success_rate_min must be in [0, 1]"));
        }
    }

    errors
}

fn validate_request(req: &RequestSpec) -> Vec<Z6Error> {
    let mut errors = Vec::new();

    if req.name.trim().is_empty() {
        errors.push(Z6Error::Scenario(ScenarioError::MissingRequiredField(
            "requests[].name".to_string(),
        )));
    }
    if !req.path.starts_with('/') {
        errors.push(invalid(&format!(
            "request '{}': path must start with '/' (got: {})",
            req.name, req.path
        )));
    }
    if req.timeout_ms == 0 {
        errors.push(invalid(&format!(
            "request '{}': timeout_ms must be at least 1",
            req.name
        )));
    }
    if !(req.weight > 0.0) || !req.weight.is_finite() {
        errors.push(invalid(&format!(
            "request '{}': weight must be a positive finite number",
            req.name
        )));
    }

    errors
}

fn invalid(msg: &str) -> Z6Error {
    Z6Error::Scenario(ScenarioError::InvalidValue(msg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::model::{
        Assertions, HttpMethod, HttpVersion, RuntimeConfig, Schedule, TargetConfig,
    };
    use std::collections::BTreeMap;

    fn valid_scenario() -> Scenario {
        Scenario {
            runtime: RuntimeConfig {
                duration_seconds: 10,
                vus: 5,
                prng_seed: None,
                think_time_ms: None,
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                port: 8080,
                tls: false,
                http_version: HttpVersion::H1_1,
            },
            requests: vec![RequestSpec {
                name: "home".to_string(),
                method: HttpMethod::Get,
                path: "/".to_string(),
                timeout_ms: 1000,
                headers: BTreeMap::new(),
                body: None,
                weight: 1.0,
            }],
            schedule: Schedule::default(),
            assertions: Assertions::default(),
        }
    }

    #[test]
    fn valid_scenario_has_no_errors() {
        assert!(validate(&valid_scenario()).is_empty());
    }

    #[test]
    fn zero_duration_rejected() {
        let mut s = valid_scenario();
        s.runtime.duration_seconds = 0;
        assert_eq!(validate(&s).len(), 1);
    }

    #[test]
    fn vus_bounds_enforced() {
        let mut s = valid_scenario();
        s.runtime.vus = 0;
        assert!(!validate(&s).is_empty());
        s.runtime.vus = MAX_SCENARIO_VUS;
        assert!(validate(&s).is_empty());
        s.runtime.vus = MAX_SCENARIO_VUS + 1;
        assert!(!validate(&s).is_empty());
    }

    #[test]
    fn empty_host_rejected() {
        let mut s = valid_scenario();
        s.target.host = "  ".to_string();
        let errors = validate(&s);
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("target.host")));
    }

    #[test]
    fn zero_port_rejected() {
        let mut s = valid_scenario();
        s.target.port = 0;
        assert!(!validate(&s).is_empty());
    }

    #[test]
    fn tls_rejected() {
        let mut s = valid_scenario();
        s.target.tls = true;
        let errors = validate(&s);
        assert!(errors.iter().any(|e| e.to_string().contains("tls")));
    }

    #[test]
    fn no_requests_rejected() {
        let mut s = valid_scenario();
        s.requests.clear();
        assert!(!validate(&s).is_empty());
    }

    #[test]
    fn too_many_requests_rejected() {
        let mut s = valid_scenario();
        let template = s.requests[0].clone();
        s.requests = (0..=MAX_SCENARIO_REQUESTS)
            .map(|i| {
                let mut r = template.clone();
                r.name = format!("req-{i}");
                r
            })
            .collect();
        let errors = validate(&s);
        assert!(errors
            .iter()
            .any(|e| matches!(e, Z6Error::Scenario(ScenarioError::TooManyRequests))));
    }

    #[test]
    fn request_at_limit_accepted() {
        let mut s = valid_scenario();
        let template = s.requests[0].clone();
        s.requests = (0..MAX_SCENARIO_REQUESTS)
            .map(|i| {
                let mut r = template.clone();
                r.name = format!("req-{i}");
                r
            })
            .collect();
        assert!(validate(&s).is_empty());
    }

    #[test]
    fn nonpositive_weight_rejected() {
        for weight in [0.0f32, -1.0, f32::NAN, f32::INFINITY] {
            let mut s = valid_scenario();
            s.requests[0].weight = weight;
            assert!(!validate(&s).is_empty(), "weight {weight} should fail");
        }
    }

    #[test]
    fn relative_path_rejected() {
        let mut s = valid_scenario();
        s.requests[0].path = "index.html".to_string();
        assert!(!validate(&s).is_empty());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut s = valid_scenario();
        s.requests[0].timeout_ms = 0;
        assert!(!validate(&s).is_empty());
    }

    #[test]
    fn assertion_rate_bounds_enforced() {
        let mut s = valid_scenario();
        s.assertions.error_rate_max = Some(1.5);
        assert!(!validate(&s).is_empty());
        s.assertions.error_rate_max = Some(0.05);
        s.assertions.success_rate_min = Some(-0.1);
        assert!(!validate(&s).is_empty());
    }

    #[test]
    fn multiple_problems_reported_together() {
        let mut s = valid_scenario();
        s.runtime.vus = 0;
        s.target.port = 0;
        s.requests[0].weight = 0.0;
        assert!(validate(&s).len() >= 3);
    }
}
