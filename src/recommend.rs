//! Recommendation façade.
//!
//! Resolves an external seed id to a graph node, ranks, and maps results back.
//! An unresolvable seed is a cold start (empty answer), never an error.

use crate::cancel::Cancellation;
use crate::graph::{BipartiteGraph, NodeId, Side};
use crate::salsa::{rank_cancellable, SalsaConfig};
use crate::Result;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no mapping for {0}")]
    NotFound(String),
    #[error("lookup backend failed: {0}")]
    Backend(String),
}

/// Translation between external identifiers and graph nodes.
pub trait IdentifierLookup: Send + Sync {
    type ExternalId: Clone + std::fmt::Debug;

    fn resolve(&self, external: &Self::ExternalId) -> std::result::Result<(NodeId, Side), LookupError>;

    fn unresolve(&self, node: NodeId, side: Side) -> std::result::Result<Self::ExternalId, LookupError>;
}

/// Renderable content for a node. Only the façade consults it.
pub trait ContentLookup: Send + Sync {
    type Content;

    fn content_for(&self, node: NodeId, side: Side) -> std::result::Result<Self::Content, LookupError>;
}

/// Placeholder for a façade built without a content collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContent;

impl ContentLookup for NoContent {
    type Content = ();

    fn content_for(&self, node: NodeId, _side: Side) -> std::result::Result<(), LookupError> {
        Err(LookupError::NotFound(node.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecommendOptions {
    /// Attach content from the content collaborator, when one is installed.
    pub with_content: bool,
    /// Put the seed itself first, with a hit count of 0.
    pub include_seed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation<X, T> {
    pub id: X,
    pub hit: u64,
    pub content: Option<T>,
}

pub struct Recommender<G, I, C = NoContent> {
    graph: G,
    ids: I,
    content: Option<C>,
}

impl<G, I> Recommender<G, I, NoContent>
where
    G: BipartiteGraph + Sync,
    I: IdentifierLookup,
{
    pub fn new(graph: G, ids: I) -> Self {
        Self { graph, ids, content: None }
    }
}

impl<G, I, C> Recommender<G, I, C>
where
    G: BipartiteGraph + Sync,
    I: IdentifierLookup,
    C: ContentLookup,
{
    pub fn with_content_lookup<C2: ContentLookup>(self, content: C2) -> Recommender<G, I, C2> {
        Recommender { graph: self.graph, ids: self.ids, content: Some(content) }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn recommend(
        &self,
        seed: &I::ExternalId,
        config: &SalsaConfig,
        options: RecommendOptions,
    ) -> Result<Vec<Recommendation<I::ExternalId, C::Content>>> {
        self.recommend_cancellable(seed, config, options, &Cancellation::none())
    }

    /// Validation and cancellation errors propagate; lookup failures do not.
    pub fn recommend_cancellable(
        &self,
        seed: &I::ExternalId,
        config: &SalsaConfig,
        options: RecommendOptions,
        cancel: &Cancellation,
    ) -> Result<Vec<Recommendation<I::ExternalId, C::Content>>> {
        config.validate()?;
        let (origin, side) = match self.ids.resolve(seed) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(seed = ?seed, error = %e, "seed not in graph, cold start");
                return Ok(Vec::new());
            }
        };

        let run = rank_cancellable(&self.graph, origin, side, config, cancel)?;

        let mut out = Vec::with_capacity(run.hits.len() + usize::from(options.include_seed));
        if options.include_seed {
            out.push(Recommendation {
                id: seed.clone(),
                hit: 0,
                content: self.attach(origin, side, options),
            });
        }
        for hit in run.hits {
            match self.ids.unresolve(hit.node, side) {
                Ok(id) => out.push(Recommendation {
                    id,
                    hit: hit.count,
                    content: self.attach(hit.node, side, options),
                }),
                Err(e) => warn!(node = hit.node, side = %side, error = %e, "dropping unmappable result"),
            }
        }
        Ok(out)
    }

    fn attach(&self, node: NodeId, side: Side, options: RecommendOptions) -> Option<C::Content> {
        if !options.with_content {
            return None;
        }
        let lookup = self.content.as_ref()?;
        match lookup.content_for(node, side) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(node, side = %side, error = %e, "content lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{AdjacencyTable, GraphIndex, Partition};
    use crate::Error;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// External ids: "u<n>" for LEFT nodes, "t<n>" for RIGHT nodes.
    struct PrefixIds;

    impl IdentifierLookup for PrefixIds {
        type ExternalId = String;

        fn resolve(&self, external: &String) -> std::result::Result<(NodeId, Side), LookupError> {
            let (side, rest) = match external.split_at_checked(1) {
                Some(("u", rest)) => (Side::Left, rest),
                Some(("t", rest)) => (Side::Right, rest),
                _ => return Err(LookupError::NotFound(external.clone())),
            };
            rest.parse()
                .map(|n| (n, side))
                .map_err(|_| LookupError::NotFound(external.clone()))
        }

        fn unresolve(&self, node: NodeId, side: Side) -> std::result::Result<String, LookupError> {
            if node == 404 {
                return Err(LookupError::NotFound(node.to_string()));
            }
            Ok(match side {
                Side::Left => format!("u{node}"),
                Side::Right => format!("t{node}"),
            })
        }
    }

    struct Texts(HashMap<NodeId, &'static str>);

    impl ContentLookup for Texts {
        type Content = String;

        fn content_for(&self, node: NodeId, _side: Side) -> std::result::Result<String, LookupError> {
            self.0
                .get(&node)
                .map(|s| s.to_string())
                .ok_or_else(|| LookupError::NotFound(node.to_string()))
        }
    }

    fn index() -> Arc<GraphIndex> {
        // users 1, 2, 404 all engage tweet 10; user 1 also engages tweet 11.
        let left = AdjacencyTable::from_lists(vec![(1, vec![10, 11]), (2, vec![10]), (404, vec![10])]);
        let right = AdjacencyTable::from_lists(vec![(10, vec![1, 2, 404]), (11, vec![1])]);
        Arc::new(GraphIndex::from_partitions("test", vec![Partition::new(0, left, right)]))
    }

    fn cfg() -> SalsaConfig {
        SalsaConfig { walks: 200, walk_length: 10, ..SalsaConfig::default() }
    }

    #[test]
    fn unknown_seed_is_cold_start() {
        let r = Recommender::new(index(), PrefixIds);
        let out = r.recommend(&"x1".to_string(), &cfg(), RecommendOptions::default()).unwrap();
        assert!(out.is_empty());
        let out = r.recommend(&"u999".to_string(), &cfg(), RecommendOptions::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn validation_beats_cold_start() {
        let r = Recommender::new(index(), PrefixIds);
        let bad = SalsaConfig { walks: 0, ..cfg() };
        let err = r.recommend(&"x1".to_string(), &bad, RecommendOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn maps_results_back_and_drops_unmappable() {
        let r = Recommender::new(index(), PrefixIds);
        let out = r.recommend(&"u1".to_string(), &cfg(), RecommendOptions::default()).unwrap();
        let ids: Vec<&str> = out.iter().map(|x| x.id.as_str()).collect();
        assert_eq!(ids, vec!["u2"]);
        assert!(out[0].hit > 0);
        assert!(out[0].content.is_none());
    }

    #[test]
    fn include_seed_and_content() {
        let texts = Texts(HashMap::from([(10, "hello"), (11, "world")]));
        let r = Recommender::new(index(), PrefixIds).with_content_lookup(texts);
        let opts = RecommendOptions { with_content: true, include_seed: true };
        let out = r.recommend(&"t10".to_string(), &cfg(), opts).unwrap();
        assert_eq!(out[0].id, "t10");
        assert_eq!(out[0].hit, 0);
        assert_eq!(out[0].content.as_deref(), Some("hello"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].id, "t11");
        assert_eq!(out[1].content.as_deref(), Some("world"));
    }

    #[test]
    fn cancellation_propagates() {
        let r = Recommender::new(index(), PrefixIds);
        let token = crate::cancel::CancelToken::new();
        token.cancel();
        let err = r
            .recommend_cancellable(
                &"u1".to_string(),
                &cfg(),
                RecommendOptions::default(),
                &Cancellation::none().with_token(token),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
