//! Region-resilience probe
//!
//! A probe call creates a secret under a fresh name and reads it back through a
//! client built for one [`RegionMode`]. Scenarios chain such calls to check that
//! an earlier failure or success never changes the outcome of a later,
//! independent call.

use chrono::{TimeZone, Utc};
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{
    ambient_region_from_env, ClientError, CreateSecretInput, RegionMode, SecretsManagerClient,
};
use crate::{random_string, short_uid};

/// Result of a single probe call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Passed,
    /// Rejected on the client side or with a 4xx
    ClientRejected(String),
    /// Server fault, transport failure, or a field that did not round-trip
    Failed(String),
}

impl ProbeOutcome {
    fn from_error(err: &ClientError) -> Self {
        if err.is_client_rejection() {
            Self::ClientRejected(err.to_string())
        } else {
            Self::Failed(err.to_string())
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("passed"),
            Self::ClientRejected(reason) => write!(f, "client rejected: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// What a step accepts as a good outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Success,
    /// Passing or a client-side rejection are both fine
    NoServerFault,
}

impl Expectation {
    pub fn is_met_by(self, outcome: &ProbeOutcome) -> bool {
        match self {
            Self::Success => outcome.is_passed(),
            Self::NoServerFault => !matches!(outcome, ProbeOutcome::Failed(_)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    /// Unmet expectations are logged and the scenario continues
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub region_mode: RegionMode,
    pub requirement: Requirement,
    pub expectation: Expectation,
}

impl Step {
    pub fn required(region_mode: RegionMode, expectation: Expectation) -> Self {
        Self {
            region_mode,
            requirement: Requirement::Required,
            expectation,
        }
    }

    pub fn best_effort(region_mode: RegionMode) -> Self {
        Self {
            region_mode,
            requirement: Requirement::BestEffort,
            expectation: Expectation::Success,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Met,
    Unmet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: Step,
    pub outcome: ProbeOutcome,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub steps: Vec<StepReport>,
}

impl ScenarioReport {
    /// Best-effort steps whose expectation was not met
    pub fn tolerated_failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.verdict == Verdict::Unmet)
    }
}

/// A required step was not met
#[derive(Debug, Error)]
#[error("scenario '{}' failed at step {step} ({}): {outcome}", .report.scenario, .region_mode)]
pub struct ScenarioError {
    pub step: usize,
    pub region_mode: RegionMode,
    pub outcome: ProbeOutcome,
    /// Steps run so far, including the failing one
    pub report: ScenarioReport,
}

/// A linear sequence of independent probe calls
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub steps: Vec<Step>,
}

impl Scenario {
    /// A prior failing call must not prevent a later well-formed call from succeeding
    pub fn fail_then_succeed(region: &str) -> Self {
        Self {
            name: "fail-then-succeed",
            steps: vec![
                Step::best_effort(RegionMode::Unspecified),
                Step::required(RegionMode::explicit(region), Expectation::Success),
            ],
        }
    }

    /// A prior success must not mask a misconfiguration in a later call
    pub fn succeed_then_fail(region: &str) -> Self {
        Self {
            name: "succeed-then-fail",
            steps: vec![
                Step::required(RegionMode::explicit(region), Expectation::Success),
                Step::required(RegionMode::Unspecified, Expectation::NoServerFault),
            ],
        }
    }

    /// A failure between two successes does not degrade the second one
    pub fn succeed_fail_succeed(region: &str) -> Self {
        Self {
            name: "succeed-fail-succeed",
            steps: vec![
                Step::required(RegionMode::explicit(region), Expectation::Success),
                Step::best_effort(RegionMode::Unspecified),
                Step::required(RegionMode::explicit(region), Expectation::Success),
            ],
        }
    }

    pub async fn run(&self, probe: &Probe) -> Result<ScenarioReport, ScenarioError> {
        self.run_with(|mode| probe.create_and_get(mode)).await
    }

    /// Run every step in order through `call`
    pub async fn run_with<F, Fut>(&self, mut call: F) -> Result<ScenarioReport, ScenarioError>
    where
        F: FnMut(RegionMode) -> Fut,
        Fut: Future<Output = ProbeOutcome>,
    {
        let mut report = ScenarioReport {
            scenario: self.name,
            steps: Vec::with_capacity(self.steps.len()),
        };

        for (index, step) in self.steps.iter().enumerate() {
            let outcome = call(step.region_mode.clone()).await;
            let verdict = if step.expectation.is_met_by(&outcome) {
                Verdict::Met
            } else {
                Verdict::Unmet
            };

            info!(
                scenario = self.name,
                step = index,
                region_mode = %step.region_mode,
                outcome = %outcome,
                "Probe step finished"
            );

            report.steps.push(StepReport {
                step: step.clone(),
                outcome: outcome.clone(),
                verdict,
            });

            if verdict == Verdict::Unmet {
                match step.requirement {
                    Requirement::BestEffort => {
                        warn!(
                            scenario = self.name,
                            step = index,
                            region_mode = %step.region_mode,
                            outcome = %outcome,
                            "Best-effort probe step did not succeed"
                        );
                    }
                    Requirement::Required => {
                        return Err(ScenarioError {
                            step: index,
                            region_mode: step.region_mode.clone(),
                            outcome,
                            report,
                        });
                    }
                }
            }
        }

        Ok(report)
    }
}

/// Issues create-then-get calls against one endpoint
#[derive(Debug, Clone)]
pub struct Probe {
    endpoint: String,
    ambient_region: Option<String>,
}

impl Probe {
    /// Probe whose ambient region comes from `AWS_REGION` / `AWS_DEFAULT_REGION`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ambient_region: ambient_region_from_env(),
        }
    }

    pub fn with_ambient_region(mut self, region: Option<String>) -> Self {
        self.ambient_region = region;
        self
    }

    /// A client that shares nothing with any earlier call
    fn client(&self, region_mode: RegionMode) -> Result<SecretsManagerClient, ClientError> {
        SecretsManagerClient::builder(self.endpoint.clone())
            .region_mode(region_mode)
            .ambient_region(self.ambient_region.clone())
            .build()
    }

    pub async fn create_and_get(&self, region_mode: RegionMode) -> ProbeOutcome {
        match self.check_create_and_get(region_mode).await {
            Ok(()) => ProbeOutcome::Passed,
            Err(outcome) => outcome,
        }
    }

    async fn check_create_and_get(&self, region_mode: RegionMode) -> Result<(), ProbeOutcome> {
        let client = self
            .client(region_mode)
            .map_err(|e| ProbeOutcome::from_error(&e))?;

        let name = format!("s-{}", short_uid());
        let value = random_string(24);

        let created = client
            .create_secret(&CreateSecretInput::new(&name).secret_string(&value))
            .await
            .map_err(|e| ProbeOutcome::from_error(&e))?;
        expect_eq("create status", &200, &created.http_status)?;
        expect_eq("created Name", &name, &created.body.name)?;

        let fetched = client
            .get_secret_value(&name)
            .await
            .map_err(|e| ProbeOutcome::from_error(&e))?;
        expect_eq("Name", &name, &fetched.body.name)?;
        expect_eq("SecretString", &Some(value), &fetched.body.secret_string)?;
        expect_eq("ARN", &created.body.arn, &fetched.body.arn)?;

        let created_date = fetched
            .body
            .created_date
            .ok_or_else(|| ProbeOutcome::Failed("CreatedDate missing".to_string()))?;
        if !is_valid_timestamp(created_date) {
            return Err(ProbeOutcome::Failed(format!(
                "CreatedDate {created_date} is not a valid timestamp"
            )));
        }

        Ok(())
    }
}

fn expect_eq<T: PartialEq + fmt::Debug>(
    field: &str,
    expected: &T,
    actual: &T,
) -> Result<(), ProbeOutcome> {
    if expected == actual {
        Ok(())
    } else {
        Err(ProbeOutcome::Failed(format!(
            "{field} mismatch: expected {expected:?}, got {actual:?}"
        )))
    }
}

fn is_valid_timestamp(epoch_seconds: f64) -> bool {
    if !epoch_seconds.is_finite() || epoch_seconds <= 0.0 {
        return false;
    }
    let secs = epoch_seconds.trunc() as i64;
    let nanos = (epoch_seconds.fract() * 1e9) as u32;
    Utc.timestamp_opt(secs, nanos).single().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays scripted outcomes and records the modes it was called with
    async fn run_scripted(
        scenario: &Scenario,
        outcomes: Vec<ProbeOutcome>,
    ) -> (Result<ScenarioReport, ScenarioError>, Vec<RegionMode>) {
        let mut outcomes = VecDeque::from(outcomes);
        let mut seen = Vec::new();
        let result = scenario
            .run_with(|mode| {
                seen.push(mode);
                let outcome = outcomes.pop_front().unwrap_or(ProbeOutcome::Passed);
                async move { outcome }
            })
            .await;
        (result, seen)
    }

    fn rejected() -> ProbeOutcome {
        ProbeOutcome::ClientRejected("MissingRegion".to_string())
    }

    fn fault() -> ProbeOutcome {
        ProbeOutcome::Failed("InternalServiceError (500)".to_string())
    }

    #[test]
    fn test_expectations() {
        assert!(Expectation::Success.is_met_by(&ProbeOutcome::Passed));
        assert!(!Expectation::Success.is_met_by(&rejected()));
        assert!(Expectation::NoServerFault.is_met_by(&ProbeOutcome::Passed));
        assert!(Expectation::NoServerFault.is_met_by(&rejected()));
        assert!(!Expectation::NoServerFault.is_met_by(&fault()));
    }

    #[test]
    fn test_scenario_shapes() {
        let a = Scenario::fail_then_succeed("us-east-1");
        assert_eq!(a.steps[0].requirement, Requirement::BestEffort);
        assert_eq!(a.steps[0].region_mode, RegionMode::Unspecified);
        assert_eq!(
            a.steps[1],
            Step::required(RegionMode::explicit("us-east-1"), Expectation::Success)
        );

        let b = Scenario::succeed_then_fail("us-east-1");
        assert!(b.steps.iter().all(|s| s.requirement == Requirement::Required));
        assert_eq!(b.steps[1].expectation, Expectation::NoServerFault);

        let c = Scenario::succeed_fail_succeed("us-east-1");
        assert_eq!(c.steps.len(), 3);
        assert_eq!(c.steps[1].requirement, Requirement::BestEffort);
        assert_eq!(c.steps[0], c.steps[2]);
    }

    #[tokio::test]
    async fn test_best_effort_failure_is_tolerated() {
        let scenario = Scenario::succeed_fail_succeed("us-east-1");
        let (result, seen) = run_scripted(
            &scenario,
            vec![ProbeOutcome::Passed, fault(), ProbeOutcome::Passed],
        )
        .await;

        let report = result.unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(report.tolerated_failures().count(), 1);
        assert_eq!(report.steps[1].outcome, fault());
        assert_eq!(report.steps[2].verdict, Verdict::Met);
    }

    #[tokio::test]
    async fn test_required_failure_stops_scenario() {
        let scenario = Scenario::succeed_fail_succeed("us-east-1");
        let (result, seen) = run_scripted(&scenario, vec![rejected()]).await;

        let err = result.unwrap_err();
        assert_eq!(seen.len(), 1);
        assert_eq!(err.step, 0);
        assert_eq!(err.outcome, rejected());
        assert_eq!(err.report.steps.len(), 1);
        assert!(err.to_string().contains("succeed-fail-succeed"));
    }

    #[tokio::test]
    async fn test_no_server_fault_step() {
        let scenario = Scenario::succeed_then_fail("us-east-1");

        let (result, _) = run_scripted(&scenario, vec![ProbeOutcome::Passed, rejected()]).await;
        assert!(result.is_ok());

        let (result, _) = run_scripted(&scenario, vec![ProbeOutcome::Passed, fault()]).await;
        let err = result.unwrap_err();
        assert_eq!(err.step, 1);
        assert_eq!(err.region_mode, RegionMode::Unspecified);
    }

    #[test]
    fn test_timestamp_validation() {
        assert!(is_valid_timestamp(1_700_000_000.123));
        assert!(!is_valid_timestamp(0.0));
        assert!(!is_valid_timestamp(f64::NAN));
        assert!(!is_valid_timestamp(f64::INFINITY));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_failure() {
        // Port 9 (discard) is not served here; the connection is refused
        let probe = Probe::new("http://127.0.0.1:9").with_ambient_region(None);
        let outcome = probe
            .create_and_get(RegionMode::explicit("us-east-1"))
            .await;
        assert!(matches!(outcome, ProbeOutcome::Failed(_)));

        let outcome = probe.create_and_get(RegionMode::Unspecified).await;
        assert!(matches!(outcome, ProbeOutcome::ClientRejected(_)));
    }
}
