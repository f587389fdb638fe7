//! Query generators for simulated users.
//!
//! All generators are pure functions of their configuration and an explicit random source, so a
//! seeded RNG reproduces the exact sequence of submitted queries.

use std::fmt;

use anyhow::{Result, bail};
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_distr::Distribution;
use rand_distr::weighted::WeightedIndex;

use crate::config::{LongQuery, Queries};

const SELECTION: &str = "{selection}";
const SOURCE1: &str = "{source1}";
const SOURCE2: &str = "{source2}";

/// The kind of a query, used as the telemetry label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// An expensive scan query generated from [`LongQuery`].
    Long,
    /// A cheap query picked from a fixed list.
    Short,
}

impl QueryKind {
    pub fn label(self) -> &'static str {
        match self {
            QueryKind::Long => "Long",
            QueryKind::Short => "Short",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Picks one of the short queries uniformly at random.
///
/// Returns `None` if the list is empty.
pub fn random_short_query<'a, R: Rng + ?Sized>(
    rng: &mut R,
    queries: &'a [String],
) -> Option<&'a str> {
    queries.choose(rng).map(String::as_str)
}

/// Renders the long query template with a random selection and two distinct random data sources.
///
/// Placeholders without candidates are left untouched.
pub fn random_long_query<R: Rng + ?Sized>(rng: &mut R, long: &LongQuery) -> String {
    let mut query = long.template.clone();

    if let Some(selection) = long.selections.choose(rng) {
        query = query.replace(SELECTION, selection);
    }

    if long.data_sources.len() >= 2 {
        let sources = rand::seq::index::sample(rng, long.data_sources.len(), 2);
        query = query
            .replace(SOURCE1, &long.data_sources[sources.index(0)])
            .replace(SOURCE2, &long.data_sources[sources.index(1)]);
    }

    query
}

/// A weighted mix of long and short queries.
#[derive(Debug, Clone)]
pub struct QueryMix {
    queries: Queries,
    kinds: WeightedIndex<u32>,
}

impl QueryMix {
    /// Validates the query configuration and creates the mix.
    pub fn new(queries: Queries) -> Result<Self> {
        let weights = queries.weights;
        if weights.short > 0 && queries.short.is_empty() {
            bail!("short queries are weighted but none are configured");
        }

        let long = &queries.long;
        if weights.long > 0 {
            if long.template.trim().is_empty() {
                bail!("long queries are weighted but the template is empty");
            }
            if long.template.contains(SELECTION) && long.selections.is_empty() {
                bail!("long query template uses {SELECTION} but no selections are configured");
            }
            let uses_sources = long.template.contains(SOURCE1) || long.template.contains(SOURCE2);
            if uses_sources && long.data_sources.len() < 2 {
                bail!("long query template uses data sources but fewer than two are configured");
            }
        }

        let kinds = WeightedIndex::new([weights.long, weights.short])
            .map_err(|err| anyhow::anyhow!("invalid query weights: {err}"))?;

        Ok(Self { queries, kinds })
    }

    /// Picks the kind of the next query according to the weights.
    pub fn next_kind<R: Rng + ?Sized>(&self, rng: &mut R) -> QueryKind {
        match self.kinds.sample(rng) {
            0 => QueryKind::Long,
            _ => QueryKind::Short,
        }
    }

    /// Generates a query of the given kind.
    pub fn query<R: Rng + ?Sized>(&self, kind: QueryKind, rng: &mut R) -> String {
        match kind {
            QueryKind::Long => random_long_query(rng, &self.queries.long),
            QueryKind::Short => random_short_query(rng, &self.queries.short)
                .unwrap_or_default()
                .to_owned(),
        }
    }

    /// Picks a kind according to the weights and generates a query of that kind.
    pub fn next_query<R: Rng + ?Sized>(&self, rng: &mut R) -> (QueryKind, String) {
        let kind = self.next_kind(rng);
        (kind, self.query(kind, rng))
    }
}
