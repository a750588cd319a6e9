//! Keyword-cascade routing
//!
//! Decides which channel should answer a given message. Evaluation is an
//! ordered priority cascade: the first rule whose score crosses its
//! threshold wins and later rules are not consulted.
//!
//! 1. explicit human-handoff keywords → human operator
//! 2. audio message or voice-enabled session → realtime
//! 3. complexity keywords → human operator
//! 4. technical keywords → batched text
//! 5. default → batched text
//!
//! Keyword lists, multipliers, and thresholds live in [`RoutingConfig`] so
//! deployments can swap them without touching the cascade.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::types::{ChannelKind, ConversationContext, Message, MessageKind};

/// The engine's verdict on which channel should handle a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    pub channel: ChannelKind,
    pub reason: String,
    /// In [0, 1].
    pub confidence: f64,
    pub fallback: ChannelKind,
    pub metadata: serde_json::Value,
}

/// One scored keyword category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordCategory {
    pub keywords: Vec<String>,
    /// Scales the raw match ratio; the result is clamped to 1.0.
    pub multiplier: f64,
    /// The cascade rule fires when the score is strictly above this.
    pub threshold: f64,
}

impl KeywordCategory {
    fn new(keywords: &[&str], multiplier: f64, threshold: f64) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            multiplier,
            threshold,
        }
    }

    /// `min(matched / total * multiplier, 1.0)` over lowercase substring
    /// matches. An empty keyword list scores zero.
    fn score(&self, content: &str) -> (f64, Vec<String>) {
        if self.keywords.is_empty() {
            return (0.0, Vec::new());
        }
        let matched: Vec<String> = self
            .keywords
            .iter()
            .filter(|k| content.contains(k.as_str()))
            .cloned()
            .collect();
        let raw = matched.len() as f64 / self.keywords.len() as f64 * self.multiplier;
        (raw.min(1.0), matched)
    }
}

/// Swappable keyword configuration for the built-in cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub handoff: KeywordCategory,
    pub complexity: KeywordCategory,
    pub technical: KeywordCategory,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            handoff: KeywordCategory::new(
                &["human", "representative", "operator", "supervisor"],
                2.0,
                0.8,
            ),
            complexity: KeywordCategory::new(
                &[
                    "complaint",
                    "refund",
                    "escalate",
                    "dispute",
                    "legal",
                    "cancellation",
                ],
                1.5,
                0.7,
            ),
            technical: KeywordCategory::new(&["error", "bug", "crash", "timeout"], 1.2, 0.6),
        }
    }
}

/// A caller-registered rule consulted after the built-in cascade misses.
pub struct SupplementalRule {
    id: String,
    rule: Box<dyn Fn(&Message, &ConversationContext) -> Option<RoutingDecision> + Send + Sync>,
}

/// Stateless routing engine. `determine_route` is a pure function of its
/// inputs: identical (message, context) pairs always yield the identical
/// decision.
pub struct RoutingEngine {
    config: RoutingConfig,
    supplemental: Vec<SupplementalRule>,
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new(RoutingConfig::default())
    }
}

impl RoutingEngine {
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            config,
            supplemental: Vec::new(),
        }
    }

    /// Register a supplemental rule. Supplemental rules run after the scored
    /// built-in rules and before the terminal default, in registration order;
    /// the first rule returning a decision wins. Rules must be pure for
    /// `determine_route` to stay deterministic.
    pub fn register_rule(
        &mut self,
        id: impl Into<String>,
        rule: impl Fn(&Message, &ConversationContext) -> Option<RoutingDecision> + Send + Sync + 'static,
    ) {
        self.supplemental.push(SupplementalRule {
            id: id.into(),
            rule: Box::new(rule),
        });
    }

    /// Remove a supplemental rule by id. Returns whether a rule was removed.
    pub fn remove_rule(&mut self, id: &str) -> bool {
        let before = self.supplemental.len();
        self.supplemental.retain(|r| r.id != id);
        self.supplemental.len() < before
    }

    pub fn rule_ids(&self) -> Vec<&str> {
        self.supplemental.iter().map(|r| r.id.as_str()).collect()
    }

    /// Resolve the channel that should answer `message`.
    pub fn determine_route(
        &self,
        message: &Message,
        context: &ConversationContext,
    ) -> RoutingDecision {
        let content = message.content.to_lowercase();

        let (handoff_score, handoff_matched) = self.config.handoff.score(&content);
        if handoff_score > self.config.handoff.threshold {
            debug!(score = handoff_score, "routing: explicit human request");
            return RoutingDecision {
                channel: ChannelKind::Human,
                reason: "explicit_human_request".to_string(),
                confidence: handoff_score,
                fallback: ChannelKind::Batched,
                metadata: json!({ "matched_keywords": handoff_matched }),
            };
        }

        if message.kind == MessageKind::Audio || context.user_preferences.voice_enabled {
            debug!("routing: voice interaction");
            return RoutingDecision {
                channel: ChannelKind::Realtime,
                reason: "voice_interaction".to_string(),
                confidence: 1.0,
                fallback: ChannelKind::Batched,
                metadata: json!({
                    "audio_message": message.kind == MessageKind::Audio,
                    "voice_enabled": context.user_preferences.voice_enabled,
                }),
            };
        }

        let (complexity_score, complexity_matched) = self.config.complexity.score(&content);
        if complexity_score > self.config.complexity.threshold {
            debug!(score = complexity_score, "routing: high complexity");
            return RoutingDecision {
                channel: ChannelKind::Human,
                reason: "high_complexity".to_string(),
                confidence: complexity_score,
                fallback: ChannelKind::Batched,
                metadata: json!({ "matched_keywords": complexity_matched }),
            };
        }

        let (technical_score, technical_matched) = self.config.technical.score(&content);
        if technical_score > self.config.technical.threshold {
            debug!(score = technical_score, "routing: technical topic");
            return RoutingDecision {
                channel: ChannelKind::Batched,
                reason: "technical_topic".to_string(),
                confidence: technical_score,
                fallback: ChannelKind::Human,
                metadata: json!({ "matched_keywords": technical_matched }),
            };
        }

        for rule in &self.supplemental {
            if let Some(decision) = (rule.rule)(message, context) {
                debug!(rule = %rule.id, "routing: supplemental rule fired");
                return decision;
            }
        }

        RoutingDecision {
            channel: ChannelKind::Batched,
            reason: "default".to_string(),
            confidence: 0.5,
            fallback: ChannelKind::Realtime,
            metadata: json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ConversationContext {
        ConversationContext::new("s1", "en")
    }

    fn text(content: &str) -> Message {
        Message::user_text("s1", ChannelKind::Batched, content)
    }

    #[test]
    fn test_explicit_human_request() {
        let engine = RoutingEngine::default();
        let msg = text("I need to speak to a human representative");
        let decision = engine.determine_route(&msg, &context());
        assert_eq!(decision.channel, ChannelKind::Human);
        assert_eq!(decision.reason, "explicit_human_request");
        assert!(decision.confidence >= 0.8);
        assert_eq!(decision.fallback, ChannelKind::Batched);
    }

    #[test]
    fn test_audio_routes_to_realtime() {
        let engine = RoutingEngine::default();
        let msg = Message::user_audio("s1", ChannelKind::Batched, "what are your opening hours");
        let decision = engine.determine_route(&msg, &context());
        assert_eq!(decision.channel, ChannelKind::Realtime);
        assert_eq!(decision.reason, "voice_interaction");
    }

    #[test]
    fn test_handoff_precedes_audio() {
        // handoff is rule 1: an audio message that also asks for a human
        // goes to the human channel
        let engine = RoutingEngine::default();
        let msg = Message::user_audio(
            "s1",
            ChannelKind::Batched,
            "get me a human representative now",
        );
        let decision = engine.determine_route(&msg, &context());
        assert_eq!(decision.channel, ChannelKind::Human);
    }

    #[test]
    fn test_voice_enabled_preempts_default() {
        let engine = RoutingEngine::default();
        let mut ctx = context();
        ctx.user_preferences.voice_enabled = true;
        let decision = engine.determine_route(&text("tell me a story"), &ctx);
        assert_eq!(decision.channel, ChannelKind::Realtime);
    }

    #[test]
    fn test_complexity_routes_to_human() {
        let engine = RoutingEngine::default();
        let msg = text("I want to escalate this complaint and dispute the refund");
        let decision = engine.determine_route(&msg, &context());
        assert_eq!(decision.channel, ChannelKind::Human);
        assert_eq!(decision.reason, "high_complexity");
        assert_eq!(decision.fallback, ChannelKind::Batched);
    }

    #[test]
    fn test_technical_routes_to_batched() {
        let engine = RoutingEngine::default();
        let msg = text("getting an error and a crash, I think it's a bug");
        let decision = engine.determine_route(&msg, &context());
        assert_eq!(decision.channel, ChannelKind::Batched);
        assert_eq!(decision.reason, "technical_topic");
        assert_eq!(decision.fallback, ChannelKind::Human);
    }

    #[test]
    fn test_default_route() {
        let engine = RoutingEngine::default();
        let decision = engine.determine_route(&text("hello there"), &context());
        assert_eq!(decision.channel, ChannelKind::Batched);
        assert_eq!(decision.reason, "default");
        assert_eq!(decision.fallback, ChannelKind::Realtime);
    }

    #[test]
    fn test_determinism() {
        let engine = RoutingEngine::default();
        let msg = text("I want to escalate this complaint and dispute the refund");
        let ctx = context();
        let first = engine.determine_route(&msg, &ctx);
        for _ in 0..10 {
            assert_eq!(engine.determine_route(&msg, &ctx), first);
        }
    }

    #[test]
    fn test_score_is_clamped() {
        let category = KeywordCategory::new(&["a", "b"], 10.0, 0.5);
        let (score, matched) = category.score("a b");
        assert_eq!(score, 1.0);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_empty_keyword_list_scores_zero() {
        let category = KeywordCategory::new(&[], 2.0, 0.5);
        let (score, matched) = category.score("anything at all");
        assert_eq!(score, 0.0);
        assert!(matched.is_empty());
    }

    #[test]
    fn test_supplemental_rule_fires_before_default() {
        let mut engine = RoutingEngine::default();
        engine.register_rule("vip-streaming", |msg, _ctx| {
            msg.content.contains("vip").then(|| RoutingDecision {
                channel: ChannelKind::Streaming,
                reason: "vip_session".to_string(),
                confidence: 0.9,
                fallback: ChannelKind::Batched,
                metadata: json!({}),
            })
        });

        let decision = engine.determine_route(&text("vip request"), &context());
        assert_eq!(decision.channel, ChannelKind::Streaming);
        assert_eq!(decision.reason, "vip_session");
    }

    #[test]
    fn test_supplemental_rule_never_preempts_builtins() {
        let mut engine = RoutingEngine::default();
        engine.register_rule("grab-everything", |_msg, _ctx| {
            Some(RoutingDecision {
                channel: ChannelKind::Streaming,
                reason: "grab".to_string(),
                confidence: 1.0,
                fallback: ChannelKind::Batched,
                metadata: json!({}),
            })
        });

        let msg = text("I need to speak to a human representative");
        let decision = engine.determine_route(&msg, &context());
        assert_eq!(decision.channel, ChannelKind::Human);
    }

    #[test]
    fn test_supplemental_rules_run_in_registration_order() {
        let mut engine = RoutingEngine::default();
        engine.register_rule("first", |_msg, _ctx| {
            Some(RoutingDecision {
                channel: ChannelKind::Streaming,
                reason: "first".to_string(),
                confidence: 0.9,
                fallback: ChannelKind::Batched,
                metadata: json!({}),
            })
        });
        engine.register_rule("second", |_msg, _ctx| {
            Some(RoutingDecision {
                channel: ChannelKind::Human,
                reason: "second".to_string(),
                confidence: 0.9,
                fallback: ChannelKind::Batched,
                metadata: json!({}),
            })
        });

        let decision = engine.determine_route(&text("anything"), &context());
        assert_eq!(decision.reason, "first");
    }

    #[test]
    fn test_remove_rule() {
        let mut engine = RoutingEngine::default();
        engine.register_rule("temp", |_msg, _ctx| None);
        assert_eq!(engine.rule_ids(), vec!["temp"]);
        assert!(engine.remove_rule("temp"));
        assert!(!engine.remove_rule("temp"));
        assert!(engine.rule_ids().is_empty());
    }
}
