//! Detector/VLM client contracts (§6), consumed — never implemented — by
//! this crate's core: `detect_objects`, `analyze_vision`, `segment_damage`
//! (optional), `assess_with_vlm`. Calls go over `reqwest`, wrapped in
//! `tokio::time::timeout` by the orchestrator, mirroring the teacher's
//! async-call idiom in `qres_daemon::swarm_p2p` (timeout-wrapped peer RPCs).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned an unparseable payload: {reason}")]
    Malformed { endpoint: String, reason: String },
    #[error("{endpoint} is not configured")]
    NotConfigured { endpoint: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_name: String,
    /// 0-100, as returned by the object detector service.
    pub confidence: f64,
    pub bbox: BBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub description: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectLabel {
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub labels: Vec<Label>,
    pub objects: Vec<ObjectLabel>,
    pub detected_features: Vec<String>,
    pub property_type: String,
    pub condition: String,
    pub complexity: String,
    /// 0-100.
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentInstances {
    pub masks: Vec<String>,
    pub boxes: Vec<BBox>,
    pub scores: Vec<f64>,
    pub num_instances: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub damage_types: HashMap<String, SegmentInstances>,
}

/// The AI Assessment Schema (§6) returned by `assess_with_vlm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlmAssessment {
    pub damage_type: String,
    pub severity: String,
    /// 0-100.
    pub confidence: f64,
    pub location: String,
    pub description: String,
    pub detected_items: Vec<String>,
    pub safety_hazards: Vec<String>,
    pub compliance_issues: Vec<String>,
    pub risk_factors: Vec<String>,
    pub urgency: String,
    pub homeowner_explanation: String,
    pub contractor_advice: String,
}

impl VlmAssessment {
    /// Schema validation at the boundary (§4.9 step 6): rejects payloads
    /// with blank required fields or a confidence outside `[0, 100]`.
    pub fn validate(&self) -> Result<(), String> {
        if self.damage_type.trim().is_empty() {
            return Err("damageType must not be empty".to_string());
        }
        if !(0.0..=100.0).contains(&self.confidence) || !self.confidence.is_finite() {
            return Err("confidence must be in [0, 100]".to_string());
        }
        if !["early", "midway", "full"].contains(&self.severity.as_str()) {
            return Err(format!("unrecognized severity '{}'", self.severity));
        }
        if !["immediate", "urgent", "soon", "planned", "monitor"].contains(&self.urgency.as_str()) {
            return Err(format!("unrecognized urgency '{}'", self.urgency));
        }
        Ok(())
    }
}

/// The external detector/VLM surface (§6), consumed by the orchestrator.
/// One implementation per named detector is a single `HttpDetectorClient`
/// dispatching on endpoint configuration; `MockDetectorClient` stands in for
/// tests and the CLI demo path.
#[async_trait]
pub trait DetectorClient: Send + Sync {
    async fn detect_objects(&self, image_urls: &[String]) -> Result<Vec<DetectedObject>, DetectorError>;
    async fn analyze_vision(&self, image_urls: &[String]) -> Result<VisionAnalysis, DetectorError>;
    async fn segment_damage(
        &self,
        image_url: &str,
        damage_types: &[String],
    ) -> Result<SegmentationResult, DetectorError>;
    async fn assess_with_vlm(
        &self,
        images: &[String],
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<VlmAssessment, DetectorError>;
}

/// Real HTTP-backed detector client. Each method posts to its configured
/// endpoint and deserializes the JSON response; a missing endpoint
/// configuration surfaces as `DetectorError::NotConfigured` rather than a
/// panic, since §7 treats that as a recoverable `DetectorUnavailable`.
pub struct HttpDetectorClient {
    client: reqwest::Client,
    object_detector_url: Option<String>,
    vision_labeler_url: Option<String>,
    segmentation_url: Option<String>,
    vlm_url: Option<String>,
}

impl HttpDetectorClient {
    pub fn new(
        object_detector_url: Option<String>,
        vision_labeler_url: Option<String>,
        segmentation_url: Option<String>,
        vlm_url: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            object_detector_url,
            vision_labeler_url,
            segmentation_url,
            vlm_url,
        }
    }
}

#[async_trait]
impl DetectorClient for HttpDetectorClient {
    async fn detect_objects(&self, image_urls: &[String]) -> Result<Vec<DetectedObject>, DetectorError> {
        let endpoint = self
            .object_detector_url
            .as_ref()
            .ok_or_else(|| DetectorError::NotConfigured {
                endpoint: "primary_object_detector".to_string(),
            })?;
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "image_urls": image_urls }))
            .send()
            .await
            .map_err(|source| DetectorError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        response
            .json::<Vec<DetectedObject>>()
            .await
            .map_err(|source| DetectorError::Transport {
                endpoint: endpoint.clone(),
                source,
            })
    }

    async fn analyze_vision(&self, image_urls: &[String]) -> Result<VisionAnalysis, DetectorError> {
        let endpoint = self
            .vision_labeler_url
            .as_ref()
            .ok_or_else(|| DetectorError::NotConfigured {
                endpoint: "labeler".to_string(),
            })?;
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "image_urls": image_urls }))
            .send()
            .await
            .map_err(|source| DetectorError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        response
            .json::<VisionAnalysis>()
            .await
            .map_err(|source| DetectorError::Transport {
                endpoint: endpoint.clone(),
                source,
            })
    }

    async fn segment_damage(
        &self,
        image_url: &str,
        damage_types: &[String],
    ) -> Result<SegmentationResult, DetectorError> {
        let endpoint = self
            .segmentation_url
            .as_ref()
            .ok_or_else(|| DetectorError::NotConfigured {
                endpoint: "segmentation".to_string(),
            })?;
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "image_url": image_url, "damage_types": damage_types }))
            .send()
            .await
            .map_err(|source| DetectorError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        response
            .json::<SegmentationResult>()
            .await
            .map_err(|source| DetectorError::Transport {
                endpoint: endpoint.clone(),
                source,
            })
    }

    async fn assess_with_vlm(
        &self,
        images: &[String],
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<VlmAssessment, DetectorError> {
        let endpoint = self
            .vlm_url
            .as_ref()
            .ok_or_else(|| DetectorError::NotConfigured {
                endpoint: "vlm_assessor".to_string(),
            })?;
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({
                "images": images,
                "system_prompt": system_prompt,
                "user_prompt": user_prompt,
            }))
            .send()
            .await
            .map_err(|source| DetectorError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        let assessment: VlmAssessment =
            response
                .json()
                .await
                .map_err(|source| DetectorError::Transport {
                    endpoint: endpoint.clone(),
                    source,
                })?;
        assessment
            .validate()
            .map_err(|reason| DetectorError::Malformed {
                endpoint: endpoint.clone(),
                reason,
            })?;
        Ok(assessment)
    }
}

/// Deterministic-ish mock client used by `aegis_sim` and the CLI demo path.
/// Grounded on spec.md §4.1's documented note that the primary detector's
/// confidence stands in for the other two when real secondary detectors
/// aren't yet available — this is that simulation, made explicit and
/// swappable rather than hidden inside the fusion math.
pub struct MockDetectorClient {
    pub primary_confidence: f64,
    pub damage_class: String,
}

impl MockDetectorClient {
    pub fn new(primary_confidence: f64, damage_class: impl Into<String>) -> Self {
        Self {
            primary_confidence,
            damage_class: damage_class.into(),
        }
    }
}

#[async_trait]
impl DetectorClient for MockDetectorClient {
    async fn detect_objects(&self, _image_urls: &[String]) -> Result<Vec<DetectedObject>, DetectorError> {
        Ok(vec![DetectedObject {
            class_name: self.damage_class.clone(),
            confidence: self.primary_confidence * 100.0,
            bbox: BBox { x: 0.1, y: 0.1, w: 0.3, h: 0.3 },
        }])
    }

    async fn analyze_vision(&self, _image_urls: &[String]) -> Result<VisionAnalysis, DetectorError> {
        Ok(VisionAnalysis {
            labels: vec![Label {
                description: self.damage_class.clone(),
                score: self.primary_confidence,
            }],
            objects: vec![ObjectLabel {
                name: self.damage_class.clone(),
                score: self.primary_confidence,
            }],
            detected_features: vec![self.damage_class.clone()],
            property_type: "residential".to_string(),
            condition: "fair".to_string(),
            complexity: "moderate".to_string(),
            confidence: self.primary_confidence * 100.0,
        })
    }

    async fn segment_damage(
        &self,
        _image_url: &str,
        damage_types: &[String],
    ) -> Result<SegmentationResult, DetectorError> {
        let mut damage_type_map = HashMap::new();
        for dt in damage_types {
            damage_type_map.insert(
                dt.clone(),
                SegmentInstances {
                    masks: vec![],
                    boxes: vec![BBox { x: 0.2, y: 0.2, w: 0.25, h: 0.25 }],
                    scores: vec![self.primary_confidence],
                    num_instances: 1,
                },
            );
        }
        Ok(SegmentationResult {
            damage_types: damage_type_map,
        })
    }

    async fn assess_with_vlm(
        &self,
        _images: &[String],
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<VlmAssessment, DetectorError> {
        Ok(VlmAssessment {
            damage_type: self.damage_class.clone(),
            severity: "midway".to_string(),
            confidence: self.primary_confidence * 100.0,
            location: "exterior".to_string(),
            description: format!("mock {} assessment", self.damage_class),
            detected_items: vec![self.damage_class.clone()],
            safety_hazards: vec![],
            compliance_issues: vec![],
            risk_factors: vec![],
            urgency: "planned".to_string(),
            homeowner_explanation: "mock explanation".to_string(),
            contractor_advice: "mock advice".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlm_assessment_rejects_out_of_range_confidence() {
        let mut a = sample();
        a.confidence = 150.0;
        assert!(a.validate().is_err());
    }

    #[test]
    fn vlm_assessment_rejects_unknown_severity() {
        let mut a = sample();
        a.severity = "catastrophic".to_string();
        assert!(a.validate().is_err());
    }

    #[test]
    fn well_formed_assessment_validates() {
        assert!(sample().validate().is_ok());
    }

    fn sample() -> VlmAssessment {
        VlmAssessment {
            damage_type: "water_damage".to_string(),
            severity: "midway".to_string(),
            confidence: 80.0,
            location: "basement".to_string(),
            description: "staining on drywall".to_string(),
            detected_items: vec!["drywall".to_string()],
            safety_hazards: vec![],
            compliance_issues: vec![],
            risk_factors: vec![],
            urgency: "soon".to_string(),
            homeowner_explanation: "".to_string(),
            contractor_advice: "".to_string(),
        }
    }

    #[tokio::test]
    async fn mock_client_returns_consistent_damage_class() {
        let client = MockDetectorClient::new(0.85, "water_damage");
        let objs = client.detect_objects(&[]).await.unwrap();
        assert_eq!(objs[0].class_name, "water_damage");
        let vlm = client.assess_with_vlm(&[], "", "").await.unwrap();
        assert_eq!(vlm.damage_type, "water_damage");
    }
}
