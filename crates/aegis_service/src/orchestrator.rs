//! Assessment Orchestrator (§4.9): wires detector fan-out, fusion, Mondrian
//! Conformal Prediction, Continuum Memory, and the Safe-LUCB critic into the
//! single `assess()` entry point, in the thirteen-step order spec.md lays out.
//!
//! Grounded on `qres_daemon::swarm_p2p`'s timeout-wrapped parallel RPC
//! fan-out (`tokio::task::JoinSet` + `tokio::time::timeout`), generalized
//! from peer gossip to detector calls.

use crate::clock::Clock;
use crate::detectors::{DetectorClient, DetectorError, SegmentationResult, VisionAnalysis, VlmAssessment};
use crate::learning::{LearningHandler, ProgressionOutcome, RepairOutcome, ValidationOutcome};
use crate::repository::{Alert, Repository};
use aegis_core::{
    AdaptiveEngine, AegisConfig, AegisError, AegisResult, CalibrationStore, ContextFeatureService,
    ContextVector, ContinuumMemory, CostEstimate, Decision, DecisionRecord, DriftMonitor, DriftType,
    Evidence, MondrianConformalPredictor, ProvisionalAssessment, RawFeatures, SafeLucbCritic,
    Severity, StratumKey, Urgency, WindowRate, DetectorFusionService,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// One assessment request. Image-quality scalars and site metadata are
/// accepted at this boundary rather than derived internally: computing them
/// from raw pixels is a detector-service concern, out of scope here.
#[derive(Debug, Clone)]
pub struct AssessmentRequest {
    pub agent: String,
    pub image_refs: Vec<String>,
    pub property_type: String,
    pub age_bin: String,
    pub region: String,
    pub property_age_years: f64,
    pub lighting_quality: f64,
    pub image_clarity: f64,
    pub num_damage_sites: usize,
    pub critical_candidate: bool,
    pub segmentation_enabled: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssessmentOutcome {
    pub assessment: ProvisionalAssessment,
    pub decision: DecisionRecord,
}

fn validate_image_refs(image_refs: &[String]) -> AegisResult<()> {
    if image_refs.is_empty() {
        return Err(AegisError::InputInvalid("image_refs must not be empty".to_string()));
    }
    for url in image_refs {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AegisError::InputInvalid(format!("not a valid image URL: {url}")));
        }
    }
    Ok(())
}

pub struct Orchestrator {
    config: AegisConfig,
    detectors: Arc<dyn DetectorClient>,
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    conformal: MondrianConformalPredictor,
    critic: Mutex<SafeLucbCritic>,
    memory: Mutex<ContinuumMemory>,
    adaptive: Mutex<AdaptiveEngine>,
    drift: DriftMonitor,
    learning: LearningHandler,
    hydrated_strata: Mutex<HashSet<String>>,
    detector_fallback_count: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        config: AegisConfig,
        detectors: Arc<dyn DetectorClient>,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        agent: impl Into<String>,
    ) -> Self {
        let conformal = MondrianConformalPredictor::new(
            config.conformal.alpha,
            config.conformal.min_calibration_size,
            config.conformal.ssbc_sample_threshold,
        );
        let critic = SafeLucbCritic::new(
            config.critic.ridge_lambda,
            config.critic.exploration_alpha,
            config.critic.seed_safe_min_n,
            config.critic.seed_safe_sfn_bound,
            config.critic.wilson_confidence,
        );
        let titans_rate = config
            .memory
            .titans_enabled
            .then_some(config.memory.titans_adjustment_rate);
        let memory = ContinuumMemory::with_titans(
            config.memory.num_levels,
            config.memory.base_frequency,
            config.memory.frequency_multiplier,
            config.memory.base_chunk_size,
            config.memory.chunk_min,
            config.memory.chunk_max,
            config.memory.base_learning_rate,
            config.memory.hidden_width,
            aegis_core::CONTEXT_VECTOR_LEN,
            5,
            titans_rate,
        );
        let adaptive = AdaptiveEngine::new(
            config.adaptive.window_size,
            config.adaptive.min_observations,
            config.adaptive.trend_threshold,
            config.adaptive.adaptation_rate,
        );
        let drift = DriftMonitor::new(config.drift.no_drift_threshold, config.drift.adjustment_scale);
        Self {
            config,
            detectors,
            repository,
            clock,
            conformal,
            critic: Mutex::new(critic),
            memory: Mutex::new(memory),
            adaptive: Mutex::new(adaptive),
            drift,
            learning: LearningHandler::new(agent),
            hydrated_strata: Mutex::new(HashSet::new()),
            detector_fallback_count: AtomicU64::new(0),
        }
    }

    /// Loads a stratum's critic state from the repository the first time
    /// this process sees it; subsequent calls reuse the in-memory state.
    async fn hydrate_critic(&self, stratum: &str) -> AegisResult<()> {
        let mut seen = self.hydrated_strata.lock().await;
        if seen.contains(stratum) {
            return Ok(());
        }
        if let Some(snapshot) = self.repository.get_critic_model(stratum).await? {
            self.critic.lock().await.load_snapshot(stratum, snapshot);
        }
        seen.insert(stratum.to_string());
        Ok(())
    }

    async fn persist_critic(&self, stratum: &str) -> AegisResult<()> {
        let snapshot = self.critic.lock().await.snapshot(stratum);
        if let Some(snapshot) = snapshot {
            self.repository.upsert_critic_model(stratum, snapshot).await?;
        }
        Ok(())
    }

    async fn persist_memory(&self, agent: &str) -> AegisResult<()> {
        let mut memory = self.memory.lock().await;
        for level in 0..memory.num_levels() {
            if let Some(snapshot) = memory.export_level(agent, level) {
                self.repository.upsert_memory_level(agent, level, snapshot).await?;
            }
        }
        Ok(())
    }

    async fn build_calibration_store(&self, key: &StratumKey) -> AegisResult<CalibrationStore> {
        // Mirrors `StratumKey::back_off_chain`'s drop order (damage, region,
        // age_bin, property_type, then "global") since that chain is private
        // to the conformal module; kept in lock-step with it.
        let pt = key.property_type.as_deref();
        let ab = key.age_bin.as_deref();
        let rg = key.region.as_deref();
        let dm = key.damage.as_deref();
        let leaf = |pt: Option<&str>, ab: Option<&str>, rg: Option<&str>, dm: Option<&str>| -> String {
            let parts = [pt.unwrap_or("*"), ab.unwrap_or("*"), rg.unwrap_or("*"), dm.unwrap_or("*")];
            if parts.iter().all(|p| *p == "*") {
                "global".to_string()
            } else {
                parts.join("_")
            }
        };
        let candidates = [
            leaf(pt, ab, rg, dm),
            leaf(pt, ab, rg, None),
            leaf(pt, ab, None, None),
            leaf(pt, None, None, None),
            leaf(None, None, None, None),
        ];
        let mut store = CalibrationStore::new();
        for stratum in candidates {
            let points = self
                .repository
                .get_calibration(&stratum, self.config.conformal.recency_window_days as usize * 10)
                .await?;
            store.insert(stratum, points);
        }
        Ok(store)
    }

    /// Compares the last `drift.window_days` of historical validations for
    /// this (property_type, age_bin, region) triple against the preceding
    /// window of the same length, and folds any detected drift into the
    /// detector weights `DetectorFusionService::fuse` receives. Seasonal is
    /// the only candidate classification available from activity-rate
    /// history alone (material/temporal drift would need a labeled cause);
    /// a non-seasonal shift still surfaces as `has_drift` with a
    /// conservative uniform pull toward the more stable detectors.
    async fn drift_adjusted_weights(
        &self,
        property_type: &str,
        age_bin: &str,
        region: &str,
    ) -> AegisResult<HashMap<String, f64>> {
        let window_days = self.config.drift.window_days;
        let now = self.clock.now();
        let recent_since = now - chrono::Duration::days(window_days);
        let prior_since = now - chrono::Duration::days(window_days * 2);

        let recent = self
            .repository
            .get_historical_validation(property_type, age_bin, region, recent_since)
            .await?;
        let covering_both = self
            .repository
            .get_historical_validation(property_type, age_bin, region, prior_since)
            .await?;
        let prior_count = covering_both.len().saturating_sub(recent.len());

        let days = window_days.max(1) as f64;
        let recent_rate = WindowRate { rate: recent.len() as f64 / days };
        let prior_rate = WindowRate { rate: prior_count as f64 / days };

        let report = self.drift.detect(recent_rate, prior_rate, DriftType::Seasonal);
        if report.has_drift {
            info!(
                drift_type = ?report.drift_type,
                score = report.score,
                "detector weight drift adjustment applied"
            );
        }
        Ok(DriftMonitor::apply_adjustment(&self.config.detector.default_weights, &report))
    }

    /// Calls the VLM assessor with retry-on-failure and exponential backoff,
    /// doubling a 200ms base delay up to three attempts. A `NotConfigured`
    /// endpoint never retries since no backoff will make it appear.
    async fn assess_with_vlm_retrying(
        &self,
        image_refs: &[String],
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<VlmAssessment, DetectorError> {
        let mut delay = Duration::from_millis(200);
        let mut last_err = None;
        for attempt in 0..3 {
            let call = timeout(
                Duration::from_secs(self.config.detector.vision_timeout_secs),
                self.detectors.assess_with_vlm(image_refs, system_prompt, user_prompt),
            )
            .await;
            match call {
                Ok(Ok(assessment)) => return Ok(assessment),
                Ok(Err(DetectorError::NotConfigured { endpoint })) => {
                    return Err(DetectorError::NotConfigured { endpoint })
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "vlm_assessor call failed, retrying");
                    last_err = Some(e);
                }
                Err(_) => {
                    warn!(attempt, "vlm_assessor call timed out, retrying");
                    last_err = Some(DetectorError::Malformed {
                        endpoint: "vlm_assessor".to_string(),
                        reason: "timed out".to_string(),
                    });
                }
            }
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        Err(last_err.unwrap_or(DetectorError::Malformed {
            endpoint: "vlm_assessor".to_string(),
            reason: "exhausted retries".to_string(),
        }))
    }

    /// Runs the full thirteen-step pipeline (§4.9). A top-level catch around
    /// the body beyond input validation guarantees that any otherwise-
    /// unhandled error still resolves to a forced `Escalate` decision with an
    /// alert, rather than leaving the caller to decide what a bare error means
    /// for a request that already passed detector fan-out.
    pub async fn assess(&self, request: &AssessmentRequest) -> AegisResult<AssessmentOutcome> {
        let start = std::time::Instant::now();

        // Step 1: validate image references. Malformed input always
        // propagates directly; it never reaches the forced-escalate catch.
        validate_image_refs(&request.image_refs)?;

        match self.assess_pipeline(request, start).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(error = %err, "unhandled error in assessment pipeline, forcing escalate");
                let record = DecisionRecord {
                    decision: Decision::Escalate,
                    reason: "error in pipeline".to_string(),
                    safety_ucb: 0.0,
                    reward_ucb: 0.0,
                    safety_threshold: 0.0,
                    exploration: false,
                    stratum: "unknown".to_string(),
                    prediction_set: Vec::new(),
                    fusion_mean: 0.0,
                    fusion_variance: 0.0,
                    context_vector: ContextVector([0.0; aegis_core::CONTEXT_VECTOR_LEN]),
                    shadow: false,
                    timing_ms: start.elapsed().as_millis() as u64,
                };
                self.repository.append_decision(record.clone()).await?;
                self.repository
                    .append_alert(Alert {
                        id: format!("pipeline-error-{}", self.clock.now().to_rfc3339()),
                        severity: "critical".to_string(),
                        message: format!("error in pipeline: {err}"),
                        created_at: self.clock.now(),
                    })
                    .await?;
                Ok(AssessmentOutcome {
                    assessment: ProvisionalAssessment {
                        damage_type: "unknown".to_string(),
                        severity: Severity::Midway,
                        confidence: 0.0,
                        urgency: Urgency::Urgent,
                        has_critical_hazard: false,
                        cost_estimate: None,
                        detected_items: Vec::new(),
                        evidence: Vec::new(),
                    },
                    decision: record,
                })
            }
        }
    }

    async fn assess_pipeline(
        &self,
        request: &AssessmentRequest,
        start: std::time::Instant,
    ) -> AegisResult<AssessmentOutcome> {
        // Step 2: advance Continuum Memory's global step counter once per
        // invocation, then fan out to detectors in parallel, each wrapped in a timeout.
        self.memory.lock().await.advance_step();
        let detector_timeout = Duration::from_secs(self.config.detector.detector_timeout_secs);
        let mut join_set = tokio::task::JoinSet::new();
        {
            let detectors = self.detectors.clone();
            let refs = request.image_refs.clone();
            join_set.spawn(async move {
                (
                    "primary_object_detector",
                    timeout(detector_timeout, async move {
                        detectors.detect_objects(&refs).await.map(DetectorOutput::Objects)
                    })
                    .await,
                )
            });
        }
        {
            let detectors = self.detectors.clone();
            let refs = request.image_refs.clone();
            let vision_timeout = Duration::from_secs(self.config.detector.vision_timeout_secs);
            join_set.spawn(async move {
                (
                    "labeler",
                    timeout(vision_timeout, async move {
                        detectors.analyze_vision(&refs).await.map(DetectorOutput::Vision)
                    })
                    .await,
                )
            });
        }

        let mut object_confidence: Option<f64> = None;
        let mut vision: Option<VisionAnalysis> = None;
        let mut succeeded = 0usize;

        while let Some(joined) = join_set.join_next().await {
            let (name, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "detector task panicked");
                    continue;
                }
            };
            match (name, result) {
                ("primary_object_detector", Ok(Ok(DetectorOutput::Objects(objects)))) => {
                    if !objects.is_empty() {
                        let avg =
                            objects.iter().map(|o| o.confidence).sum::<f64>() / objects.len() as f64;
                        object_confidence = Some((avg / 100.0).clamp(0.0, 1.0));
                        succeeded += 1;
                    }
                }
                ("labeler", Ok(Ok(DetectorOutput::Vision(analysis)))) => {
                    succeeded += 1;
                    vision = Some(analysis);
                }
                (_, Ok(Ok(_))) => {}
                (name, Ok(Err(e))) => {
                    let total = self.detector_fallback_count.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(target: "detector.fallback", detector = name, error = %e, total, "detector call failed");
                }
                (name, Err(_)) => {
                    let total = self.detector_fallback_count.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(target: "detector.fallback", detector = name, total, "detector call timed out");
                }
                _ => {}
            }
        }

        if succeeded == 0 && !self.config.detector.gpt_only_fallback {
            return Err(AegisError::DetectorUnavailable {
                detector: "all".to_string(),
                reason: "no detector responded and gpt_only_fallback is disabled".to_string(),
            });
        }
        let low_evidence_fallback = succeeded == 0;

        // Step 3: optional segmentation.
        let segmentation: Option<SegmentationResult> = if request.segmentation_enabled {
            let damage_types: Vec<String> = aegis_core::CLASS_CATALOGUE.iter().map(|c| c.to_string()).collect();
            match timeout(
                detector_timeout,
                self.detectors.segment_damage(&request.image_refs[0], &damage_types),
            )
            .await
            {
                Ok(Ok(result)) => Some(result),
                Ok(Err(e)) => {
                    warn!(error = %e, "segmentation call failed");
                    None
                }
                Err(_) => {
                    warn!("segmentation call timed out");
                    None
                }
            }
        } else {
            None
        };
        let segmentation_confidence: Option<f64> = segmentation.as_ref().and_then(|seg| {
            let scores: Vec<f64> = seg.damage_types.values().flat_map(|i| i.scores.iter().copied()).collect();
            if scores.is_empty() {
                None
            } else {
                Some(scores.iter().sum::<f64>() / scores.len() as f64)
            }
        });

        // Step 4: scene-graph features if the labeler produced structured output.
        let has_structured_output = vision.as_ref().map(|v| !v.detected_features.is_empty()).unwrap_or(false);
        let scene_graph_scalar = vision.as_ref().map(|v| (v.confidence / 100.0).clamp(0.0, 1.0));

        // Step 5: query Memory at all levels for a 5-vector adjustment.
        let provisional_confidence_guess = object_confidence.or(scene_graph_scalar).unwrap_or(0.5);
        let query_keys = vec![provisional_confidence_guess; aegis_core::CONTEXT_VECTOR_LEN];
        let memory_query = self.memory.lock().await.query(&request.agent, &query_keys, None);
        let memory_adj = if self.config.learned_features_enabled && memory_query.confidence > 0.0 {
            // Confidence-weighted mean of the recalled 5-vector, matching the
            // single scalar `with_memory_adjustment` expects.
            memory_query.values.iter().sum::<f64>() / memory_query.values.len() as f64
        } else {
            // Rule-based fallback: no learned signal yet, no adjustment.
            0.0
        };

        // Step 6: call the VLM assessor with retry/backoff, validate schema.
        let system_prompt = "Assess property damage from the provided imagery.";
        let user_prompt = format!(
            "property_type={} region={} age_years={}",
            request.property_type, request.region, request.property_age_years
        );
        let vlm = self
            .assess_with_vlm_retrying(&request.image_refs, system_prompt, &user_prompt)
            .await
            .map_err(|e| AegisError::DetectorUnavailable {
                detector: "vlm_assessor".to_string(),
                reason: e.to_string(),
            })?;
        vlm.validate().map_err(AegisError::InputInvalid)?;

        let severity = parse_severity(&vlm.severity);
        let urgency = parse_urgency(&vlm.urgency);

        // Step 7: structure the provisional assessment from the validated payload.
        let provisional = ProvisionalAssessment {
            damage_type: vlm.damage_type.clone(),
            severity,
            confidence: vlm.confidence,
            urgency,
            has_critical_hazard: !vlm.safety_hazards.is_empty() || request.critical_candidate,
            cost_estimate: Some(estimate_cost(severity)),
            detected_items: vlm.detected_items.clone(),
            evidence: Vec::new(),
        };

        // Step 8: apply Memory adjustments.
        let provisional = provisional.with_memory_adjustment(memory_adj);

        // Step 9: fuse evidence; build ConformalResult; compute OOD/disagreement/quality scalars.
        let mut evidence_list = Vec::new();
        if let Some(conf) = object_confidence {
            evidence_list.push(Evidence::new("primary_object_detector", conf));
        }
        if let Some(conf) = segmentation_confidence {
            evidence_list.push(Evidence::new("segmentation", conf));
        }

        let fusion = if let Some(high_level) = DetectorFusionService::fuse_high_level(
            segmentation_confidence,
            Some(vlm.confidence / 100.0),
            scene_graph_scalar,
            self.config.detector.epistemic_floor,
        ) {
            high_level
        } else {
            let weights = self
                .drift_adjusted_weights(&request.property_type, &request.age_bin, &request.region)
                .await?;
            DetectorFusionService::fuse(
                &evidence_list,
                provisional.confidence / 100.0,
                &weights,
                &correlation_matrix(&self.config),
                self.config.detector.epistemic_floor,
                self.config.detector.low_evidence_penalty,
            )
        };

        let stratum_key = StratumKey::full(&request.property_type, &request.age_bin, &request.region, &provisional.damage_type);
        let calibration_store = self.build_calibration_store(&stratum_key).await?;
        let conformal = self.conformal.predict(fusion.mean, &provisional.damage_type, &stratum_key, &calibration_store);

        let detector_disagreement = fusion.breakdown.disagreement.sqrt().clamp(0.0, 1.0);
        let ood_score = (fusion.variance).clamp(0.0, 1.0);

        // Step 10: assemble the context vector and select delta.
        let raw_features = RawFeatures {
            fusion_confidence: fusion.mean,
            fusion_variance: fusion.variance,
            cp_set_size: conformal.prediction_set.len(),
            safety_critical_candidate: provisional.has_critical_hazard,
            lighting_quality: request.lighting_quality,
            image_clarity: request.image_clarity,
            property_age_years: request.property_age_years,
            num_damage_sites: request.num_damage_sites,
            detector_disagreement,
            ood_score,
            region: request.region.clone(),
            property_age_years_for_bin: request.property_age_years,
        };
        let context = ContextFeatureService::construct(&raw_features);
        let delta = self.config.safety_thresholds.for_property_class(&request.property_type);

        // Step 11: invoke the critic.
        let since = self.clock.now() - chrono::Duration::days(365);
        let historical = self
            .repository
            .get_historical_validation(&request.property_type, &request.age_bin, &request.region, since)
            .await?;
        let historical_n = historical.len() as u64;
        let historical_sfn_count = historical.iter().filter(|o| o.safety_false_negative).count() as u64;

        self.hydrate_critic(&conformal.stratum).await?;
        let selection = {
            let mut critic = self.critic.lock().await;
            critic.select_arm(
                &context,
                delta,
                &conformal.stratum,
                historical_n,
                historical_sfn_count,
                provisional.has_critical_hazard,
            )?
        };

        // Step 12: shadow mode forces escalate but still records the would-be decision.
        let shadow = self.config.shadow_mode;
        let final_decision = if shadow { Decision::Escalate } else { selection.arm };

        let record = DecisionRecord {
            decision: final_decision,
            reason: selection.reason,
            safety_ucb: selection.safety_ucb,
            reward_ucb: selection.reward_ucb,
            safety_threshold: selection.safety_threshold,
            exploration: selection.exploration,
            stratum: conformal.stratum.clone(),
            prediction_set: conformal.prediction_set.clone(),
            fusion_mean: fusion.mean,
            fusion_variance: fusion.variance,
            context_vector: context,
            shadow,
            timing_ms: start.elapsed().as_millis() as u64,
        };
        self.repository.append_decision(record.clone()).await?;
        if low_evidence_fallback {
            warn!(stratum = %record.stratum, "assessment degraded: no detector responded, gpt-only fallback used");
        }

        info!(
            decision = ?record.decision,
            stratum = %record.stratum,
            shadow,
            duration_ms = record.timing_ms,
            "assess() complete"
        );

        // Step 13: return the assessment with its attached decision.
        Ok(AssessmentOutcome {
            assessment: provisional,
            decision: record,
        })
    }

    /// Records a human-validated outcome, advancing Continuum Memory and
    /// persisting any levels that came due.
    pub async fn record_validation_outcome(
        &self,
        context_keys: &[f64],
        outcome: &ValidationOutcome<'_>,
    ) -> AegisResult<()> {
        let event = {
            let mut memory = self.memory.lock().await;
            let mut adaptive = self.adaptive.lock().await;
            self.learning.handle_validation(&mut memory, &mut adaptive, context_keys, outcome)
        };
        if let Some(event) = event {
            self.memory.lock().await.scale_chunk_size(
                event.level,
                event.factor,
                self.config.memory.chunk_min,
                self.config.memory.chunk_max,
            );
        }
        self.persist_memory(&self.learning_agent()).await
    }

    pub async fn record_repair_outcome(&self, context_keys: &[f64], outcome: &RepairOutcome) -> AegisResult<()> {
        self.learning.handle_repair(&mut *self.memory.lock().await, context_keys, outcome);
        self.persist_memory(&self.learning_agent()).await
    }

    pub async fn record_progression_outcome(
        &self,
        context_keys: &[f64],
        outcome: &ProgressionOutcome,
    ) -> AegisResult<()> {
        self.learning.handle_progression(&mut *self.memory.lock().await, context_keys, outcome);
        self.persist_memory(&self.learning_agent()).await
    }

    /// Records the reward/safety signal for a prior decision, updating and
    /// persisting that stratum's critic model.
    pub async fn record_decision_outcome(
        &self,
        decision: Decision,
        stratum: &str,
        context: &ContextVector,
        reward: f64,
        safety: f64,
    ) -> AegisResult<()> {
        self.hydrate_critic(stratum).await?;
        self.critic.lock().await.update(decision, stratum, context, reward, safety);
        self.persist_critic(stratum).await
    }

    fn learning_agent(&self) -> String {
        // The learning handler owns the agent key it was constructed with;
        // exposed here so callers don't have to thread it separately.
        self.learning.agent_name().to_string()
    }
}

enum DetectorOutput {
    Objects(Vec<crate::detectors::DetectedObject>),
    Vision(VisionAnalysis),
}

fn correlation_matrix(config: &AegisConfig) -> aegis_core::CorrelationMatrix {
    let c = config.detector.correlation;
    aegis_core::CorrelationMatrix::from_upper_triangle(3, &[c[0][1], c[0][2], c[1][2]])
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "early" => Severity::Early,
        "full" => Severity::Full,
        _ => Severity::Midway,
    }
}

fn parse_urgency(u: &str) -> Urgency {
    match u {
        "immediate" => Urgency::Immediate,
        "urgent" => Urgency::Urgent,
        "soon" => Urgency::Soon,
        "monitor" => Urgency::Monitor,
        _ => Urgency::Planned,
    }
}

/// Placeholder cost curve keyed by severity; real cost estimation is a
/// contractor-pricing-service concern, out of scope here.
fn estimate_cost(severity: Severity) -> CostEstimate {
    match severity {
        Severity::Early => CostEstimate { min: 100.0, max: 800.0, recommended: 350.0 },
        Severity::Midway => CostEstimate { min: 500.0, max: 4000.0, recommended: 1800.0 },
        Severity::Full => CostEstimate { min: 3000.0, max: 25000.0, recommended: 9000.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::detectors::MockDetectorClient;
    use crate::repository::InMemoryRepository;

    fn request() -> AssessmentRequest {
        AssessmentRequest {
            agent: "site-1".to_string(),
            image_refs: vec!["https://example.com/a.jpg".to_string()],
            property_type: "residential".to_string(),
            age_bin: "20-50".to_string(),
            region: "us-west-2".to_string(),
            property_age_years: 35.0,
            lighting_quality: 0.7,
            image_clarity: 0.8,
            num_damage_sites: 1,
            critical_candidate: false,
            segmentation_enabled: false,
        }
    }

    #[tokio::test]
    async fn assess_returns_a_decision_for_a_well_formed_request() {
        let orchestrator = Orchestrator::new(
            AegisConfig::default(),
            Arc::new(MockDetectorClient::new(0.85, "water_damage")),
            Arc::new(InMemoryRepository::new()),
            Arc::new(FixedClock(chrono::Utc::now())),
            "site-1",
        );
        let outcome = orchestrator.assess(&request()).await.unwrap();
        assert_eq!(outcome.assessment.damage_type, "water_damage");
        assert!(matches!(outcome.decision.decision, Decision::Automate | Decision::Escalate));
    }

    #[tokio::test]
    async fn empty_image_refs_are_rejected_before_any_detector_call() {
        let orchestrator = Orchestrator::new(
            AegisConfig::default(),
            Arc::new(MockDetectorClient::new(0.85, "water_damage")),
            Arc::new(InMemoryRepository::new()),
            Arc::new(FixedClock(chrono::Utc::now())),
            "site-1",
        );
        let mut req = request();
        req.image_refs.clear();
        let result = orchestrator.assess(&req).await;
        assert!(matches!(result, Err(AegisError::InputInvalid(_))));
    }

    #[tokio::test]
    async fn shadow_mode_always_escalates_but_still_records() {
        let mut config = AegisConfig::default();
        config.shadow_mode = true;
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(MockDetectorClient::new(0.9, "water_damage")),
            Arc::new(InMemoryRepository::new()),
            Arc::new(FixedClock(chrono::Utc::now())),
            "site-1",
        );
        let outcome = orchestrator.assess(&request()).await.unwrap();
        assert_eq!(outcome.decision.decision, Decision::Escalate);
        assert!(outcome.decision.shadow);
    }
}
