//! Peer-to-peer question routing with bounded forwarding and accumulated
//! enrichment.
//!
//! A query lives in memory while in flight: asked (direct or broadcast),
//! forwarded up to `max_hops` times with enrichments attached, answered back
//! to the original asker, then deleted. Stale entries are expired by callers;
//! there is no background reaper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

use crate::bus::Bus;
use crate::event::{topic, Event};

/// Default forwarding bound.
pub const DEFAULT_MAX_HOPS: u32 = 3;

/// Recommended in-flight TTL.
pub const QUERY_TTL: Duration = Duration::from_secs(300);

#[derive(Error, Debug, PartialEq)]
pub enum RouteError {
    #[error("query not found: {0}")]
    NotFound(String),
    #[error("query {0} reached its forwarding limit")]
    MaxHopsReached(String),
}

#[derive(Clone, Debug)]
pub struct QueryState {
    pub team_id: String,
    pub from: String,
    pub question: String,
    pub target: Option<String>,
    pub hops: u32,
    pub max_hops: u32,
    pub enrichments: Vec<String>,
    created_at: Instant,
}

#[derive(Clone, Debug, Default)]
pub struct AskOptions {
    /// Deliver to one agent; `None` broadcasts to the team.
    pub target: Option<String>,
    pub max_hops: Option<u32>,
}

/// In-flight query table plus the bus used for delivery.
#[derive(Clone)]
pub struct QueryRouter {
    bus: Bus,
    inflight: Arc<DashMap<String, QueryState>>,
}

impl QueryRouter {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Registers a query and publishes it: to the target's direct topic, or to
    /// the team topic when no target is given. Returns the query id.
    pub fn ask(&self, team_id: &str, from: &str, question: &str, options: AskOptions) -> String {
        let query_id = uuid::Uuid::new_v4().to_string();
        let state = QueryState {
            team_id: team_id.to_string(),
            from: from.to_string(),
            question: question.to_string(),
            target: options.target.clone(),
            hops: 0,
            max_hops: options.max_hops.unwrap_or(DEFAULT_MAX_HOPS),
            enrichments: Vec::new(),
            created_at: Instant::now(),
        };
        self.inflight.insert(query_id.clone(), state);

        let event = Event::Query {
            query_id: query_id.clone(),
            from: from.to_string(),
            question: question.to_string(),
            enrichments: Vec::new(),
        };
        match options.target.as_deref() {
            Some(target) => self.bus.publish(&topic::agent(team_id, target), event),
            None => self.bus.publish(&topic::team(team_id), event),
        }
        query_id
    }

    /// Forwards to a new target, appending an optional enrichment. Hops
    /// strictly increment; past `max_hops` the call fails.
    pub fn forward(
        &self,
        query_id: &str,
        from: &str,
        new_target: &str,
        enrichment: Option<String>,
    ) -> Result<(), RouteError> {
        let mut entry = self
            .inflight
            .get_mut(query_id)
            .ok_or_else(|| RouteError::NotFound(query_id.to_string()))?;
        if entry.hops >= entry.max_hops {
            return Err(RouteError::MaxHopsReached(query_id.to_string()));
        }
        if let Some(enrichment) = enrichment {
            entry.enrichments.push(enrichment);
        }
        entry.hops += 1;
        entry.target = Some(new_target.to_string());

        let event = Event::Query {
            query_id: query_id.to_string(),
            from: from.to_string(),
            question: entry.question.clone(),
            enrichments: entry.enrichments.clone(),
        };
        let target_topic = topic::agent(&entry.team_id, new_target);
        drop(entry);
        self.bus.publish(&target_topic, event);
        Ok(())
    }

    /// Delivers the answer to the original asker's direct topic and deletes
    /// the entry.
    pub fn answer(&self, query_id: &str, from: &str, answer: &str) -> Result<(), RouteError> {
        let (_, state) = self
            .inflight
            .remove(query_id)
            .ok_or_else(|| RouteError::NotFound(query_id.to_string()))?;
        self.bus.publish(
            &topic::agent(&state.team_id, &state.from),
            Event::QueryAnswer {
                query_id: query_id.to_string(),
                from: from.to_string(),
                answer: answer.to_string(),
                enrichments: state.enrichments,
            },
        );
        Ok(())
    }

    pub fn get(&self, query_id: &str) -> Option<QueryState> {
        self.inflight.get(query_id).map(|e| e.clone())
    }

    /// Team owning a query (tool boundary refuses cross-team access).
    pub fn team_of(&self, query_id: &str) -> Option<String> {
        self.inflight.get(query_id).map(|e| e.team_id.clone())
    }

    /// Deletes entries older than `age`; returns how many were dropped.
    pub fn expire_stale(&self, age: Duration) -> usize {
        let before = self.inflight.len();
        self.inflight.retain(|_, state| state.created_at.elapsed() < age);
        before - self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_ask_reaches_target_topic() {
        let bus = Bus::new();
        let mut bob = bus.subscribe(&topic::agent("t1", "bob"));
        let router = QueryRouter::new(bus);

        let id = router.ask(
            "t1",
            "alice",
            "how is auth wired?",
            AskOptions {
                target: Some("bob".into()),
                ..Default::default()
            },
        );
        match bob.try_recv().unwrap() {
            Event::Query { query_id, from, .. } => {
                assert_eq!(query_id, id);
                assert_eq!(from, "alice");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn hops_strictly_increment_and_bound_forwarding() {
        let router = QueryRouter::new(Bus::new());
        let id = router.ask(
            "t1",
            "alice",
            "q",
            AskOptions {
                max_hops: Some(2),
                ..Default::default()
            },
        );
        router.forward(&id, "bob", "carol", None).unwrap();
        assert_eq!(router.get(&id).unwrap().hops, 1);
        router.forward(&id, "carol", "dave", None).unwrap();
        assert_eq!(router.get(&id).unwrap().hops, 2);
        let err = router.forward(&id, "dave", "erin", None).unwrap_err();
        assert_eq!(err, RouteError::MaxHopsReached(id));
    }

    #[tokio::test]
    async fn answer_carries_enrichments_and_deletes_entry() {
        let bus = Bus::new();
        let mut alice = bus.subscribe(&topic::agent("t1", "alice"));
        let router = QueryRouter::new(bus);

        let id = router.ask(
            "t1",
            "alice",
            "q",
            AskOptions {
                target: Some("bob".into()),
                ..Default::default()
            },
        );
        router
            .forward(&id, "bob", "carol", Some("see lib/auth".into()))
            .unwrap();
        router.answer(&id, "carol", "JWT").unwrap();

        match alice.try_recv().unwrap() {
            Event::QueryAnswer {
                answer, enrichments, ..
            } => {
                assert_eq!(answer, "JWT");
                assert_eq!(enrichments, vec!["see lib/auth".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(router.get(&id).is_none());
        assert_eq!(
            router.answer(&id, "carol", "again"),
            Err(RouteError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn expire_stale_drops_old_entries() {
        let router = QueryRouter::new(Bus::new());
        router.ask("t1", "alice", "q", AskOptions::default());
        assert_eq!(router.expire_stale(Duration::from_secs(300)), 0);
        assert_eq!(router.expire_stale(Duration::ZERO), 1);
    }
}
