//! Links between claims that share a provider, broker, or claimant.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::claims::Claim;
use crate::features::is_flagged;

/// Cap on related claims reported for a single claim.
const MAX_RELATED: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    SameClaimant,
    SharedProvider,
    SharedBroker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedClaim {
    pub claim_id: String,
    pub link: LinkKind,
    pub flagged: bool,
}

/// Claims connected to an analysed claim; only reported when some of them are flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConnections {
    pub related_claims: Vec<RelatedClaim>,
    pub flagged_links: usize,
    pub total_links: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Claim,
    Provider,
    Claimant,
    Broker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// 0–100.
    pub risk: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub source: String,
    pub target: String,
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkGraph {
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
}

fn link_between(claim: &Claim, other: &Claim) -> Option<LinkKind> {
    if other.claimant_id == claim.claimant_id {
        Some(LinkKind::SameClaimant)
    } else if claim.broker_id.is_some() && other.broker_id == claim.broker_id {
        Some(LinkKind::SharedBroker)
    } else if other.provider_id == claim.provider_id {
        Some(LinkKind::SharedProvider)
    } else {
        None
    }
}

/// Connections of `claim` within `others`, or `None` when no linked claim is flagged.
pub fn connections(claim: &Claim, others: &[Claim]) -> Option<NetworkConnections> {
    let mut related: Vec<RelatedClaim> = others
        .iter()
        .filter(|other| other.claim_id != claim.claim_id)
        .filter_map(|other| {
            link_between(claim, other).map(|link| RelatedClaim {
                claim_id: other.claim_id.clone(),
                link,
                flagged: is_flagged(other),
            })
        })
        .collect();
    let flagged_links = related.iter().filter(|r| r.flagged).count();
    if flagged_links == 0 {
        return None;
    }
    let total_links = related.len();
    related.sort_by(|a, b| {
        b.flagged
            .cmp(&a.flagged)
            .then(a.link.cmp(&b.link))
            .then_with(|| a.claim_id.cmp(&b.claim_id))
    });
    related.truncate(MAX_RELATED);
    Some(NetworkConnections {
        related_claims: related,
        flagged_links,
        total_links,
    })
}

fn flagged_share<'a>(claims: impl Iterator<Item = &'a Claim>) -> f64 {
    let (total, flagged) = claims.fold((0usize, 0usize), |(total, flagged), claim| {
        (total + 1, flagged + usize::from(is_flagged(claim)))
    });
    if total == 0 {
        0.0
    } else {
        (flagged as f64 / total as f64 * 1000.0).round() / 10.0
    }
}

fn provider_id(id: &str) -> String {
    format!("provider:{id}")
}

fn claimant_id(id: &str) -> String {
    format!("claimant:{id}")
}

fn broker_id(id: &str) -> String {
    format!("broker:{id}")
}

fn edge(source: &str, target: &str, relationship: &str) -> NetworkEdge {
    NetworkEdge {
        source: source.into(),
        target: target.into(),
        relationship: relationship.into(),
    }
}

/// Entities around a single claim; `claim_risk` is its analysed score when known.
pub fn claim_graph(claim: &Claim, claims: &[Claim], claim_risk: Option<f64>) -> NetworkGraph {
    let mut graph = NetworkGraph::default();
    let short: String = claim.claim_id.chars().take(8).collect();
    graph.nodes.push(NetworkNode {
        id: claim.claim_id.clone(),
        label: format!("Claim {short}"),
        kind: NodeKind::Claim,
        risk: claim_risk.unwrap_or(0.0),
    });

    let provider = provider_id(&claim.provider_id);
    graph.nodes.push(NetworkNode {
        id: provider.clone(),
        label: claim.provider_name.clone(),
        kind: NodeKind::Provider,
        risk: flagged_share(claims.iter().filter(|c| c.provider_id == claim.provider_id)),
    });
    graph
        .edges
        .push(edge(&claim.claim_id, &provider, "submitted_to"));

    let claimant = claimant_id(&claim.claimant_id);
    graph.nodes.push(NetworkNode {
        id: claimant.clone(),
        label: claim.claimant_name.clone(),
        kind: NodeKind::Claimant,
        risk: flagged_share(claims.iter().filter(|c| c.claimant_id == claim.claimant_id)),
    });
    graph.edges.push(edge(&claim.claim_id, &claimant, "filed_by"));

    if let Some(broker) = claim.broker_id.as_deref() {
        let node = broker_id(broker);
        graph.nodes.push(NetworkNode {
            id: node.clone(),
            label: broker.to_string(),
            kind: NodeKind::Broker,
            risk: flagged_share(
                claims
                    .iter()
                    .filter(|c| c.broker_id.as_deref() == Some(broker)),
            ),
        });
        graph.edges.push(edge(&node, &claim.claim_id, "facilitated"));
    }

    if let Some(found) = connections(claim, claims) {
        for related in found.related_claims.iter().filter(|r| r.flagged) {
            graph.nodes.push(NetworkNode {
                id: related.claim_id.clone(),
                label: format!("Claim {}", related.claim_id.chars().take(8).collect::<String>()),
                kind: NodeKind::Claim,
                risk: 100.0,
            });
            let relationship = match related.link {
                LinkKind::SameClaimant => "same_claimant",
                LinkKind::SharedProvider => "shared_provider",
                LinkKind::SharedBroker => "shared_broker",
            };
            graph
                .edges
                .push(edge(&claim.claim_id, &related.claim_id, relationship));
        }
    }
    graph
}

/// Provider, claimant, and broker entities tied together by flagged claims.
pub fn overview_graph(claims: &[Claim], max_nodes: usize) -> NetworkGraph {
    let flagged: Vec<&Claim> = claims.iter().filter(|c| is_flagged(c)).collect();
    // Order by how often an entity shows up in flagged claims.
    let mut weight: BTreeMap<String, (usize, NetworkNode)> = BTreeMap::new();
    let mut bump = |id: String, label: &str, kind: NodeKind, risk: f64| {
        weight
            .entry(id.clone())
            .or_insert_with(|| {
                (
                    0,
                    NetworkNode {
                        id,
                        label: label.to_string(),
                        kind,
                        risk,
                    },
                )
            })
            .0 += 1;
    };
    for claim in &flagged {
        bump(
            provider_id(&claim.provider_id),
            &claim.provider_name,
            NodeKind::Provider,
            flagged_share(claims.iter().filter(|c| c.provider_id == claim.provider_id)),
        );
        bump(
            claimant_id(&claim.claimant_id),
            &claim.claimant_name,
            NodeKind::Claimant,
            flagged_share(claims.iter().filter(|c| c.claimant_id == claim.claimant_id)),
        );
        if let Some(broker) = claim.broker_id.as_deref() {
            bump(
                broker_id(broker),
                broker,
                NodeKind::Broker,
                flagged_share(
                    claims
                        .iter()
                        .filter(|c| c.broker_id.as_deref() == Some(broker)),
                ),
            );
        }
    }

    let mut ranked: Vec<(usize, NetworkNode)> = weight.into_values().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
    ranked.truncate(max_nodes);
    let kept: HashSet<String> = ranked.iter().map(|(_, node)| node.id.clone()).collect();

    let mut edges = Vec::new();
    let mut seen = HashSet::new();
    for claim in &flagged {
        let claimant = claimant_id(&claim.claimant_id);
        let provider = provider_id(&claim.provider_id);
        let mut candidates = vec![(claimant.clone(), provider, "treated_by")];
        if let Some(broker) = claim.broker_id.as_deref() {
            candidates.push((broker_id(broker), claimant, "facilitated"));
        }
        for (source, target, relationship) in candidates {
            if kept.contains(&source)
                && kept.contains(&target)
                && seen.insert((source.clone(), target.clone()))
            {
                edges.push(edge(&source, &target, relationship));
            }
        }
    }

    NetworkGraph {
        nodes: ranked.into_iter().map(|(_, node)| node).collect(),
        edges,
    }
}
