//! Producer/consumer relation table keyed by global id.
//!
//! Edges are derived from proxy-valued properties of the latest full state
//! and never imply ownership.

use crate::model::message::{GlobalId, Message, Variant};
use std::collections::{BTreeMap, BTreeSet};

/// One producer referenced by a consumer property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerEdge {
    pub property: String,
    pub producer: GlobalId,
    pub port: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RelationTable {
    producers: BTreeMap<GlobalId, Vec<ProducerEdge>>,
}

impl RelationTable {
    /// Replaces the producer edges of `consumer` from its full state.
    pub fn update_consumer(&mut self, consumer: GlobalId, state: &Message) {
        let mut edges = Vec::new();
        for entry in &state.properties {
            let Variant::Proxy { global_ids, ports } = &entry.value else {
                continue;
            };
            for (index, producer) in global_ids.iter().copied().enumerate() {
                if producer == 0 || producer == consumer {
                    continue;
                }
                edges.push(ProducerEdge {
                    property: entry.name.clone(),
                    producer,
                    port: ports.get(index).copied().unwrap_or(0),
                });
            }
        }

        if edges.is_empty() {
            self.producers.remove(&consumer);
        } else {
            self.producers.insert(consumer, edges);
        }
    }

    /// Drops every edge touching `global_id`.
    pub fn remove_object(&mut self, global_id: GlobalId) {
        self.producers.remove(&global_id);
        for edges in self.producers.values_mut() {
            edges.retain(|edge| edge.producer != global_id);
        }
        self.producers.retain(|_, edges| !edges.is_empty());
    }

    pub fn producers_of(&self, consumer: GlobalId) -> &[ProducerEdge] {
        self.producers
            .get(&consumer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn consumers_of(&self, producer: GlobalId) -> Vec<GlobalId> {
        let consumers: BTreeSet<GlobalId> = self
            .producers
            .iter()
            .filter(|(_, edges)| edges.iter().any(|edge| edge.producer == producer))
            .map(|(consumer, _)| *consumer)
            .collect();
        consumers.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::RelationTable;
    use crate::model::message::{Location, Message, Variant};

    fn consumer_state(id: u32, inputs: Vec<u32>) -> Message {
        let ports = vec![0; inputs.len()];
        let mut msg = Message::new(id, Location::DATA_SERVER);
        msg.push_property(
            "Input",
            Variant::Proxy {
                global_ids: inputs,
                ports,
            },
        );
        msg
    }

    #[test]
    fn tracks_edges_in_both_directions() {
        let mut table = RelationTable::default();
        table.update_consumer(20, &consumer_state(20, vec![10, 0, 11]));
        table.update_consumer(21, &consumer_state(21, vec![10]));

        assert_eq!(table.producers_of(20).len(), 2);
        assert_eq!(table.consumers_of(10), vec![20, 21]);

        table.update_consumer(20, &consumer_state(20, vec![]));
        assert!(table.producers_of(20).is_empty());
        assert_eq!(table.consumers_of(10), vec![21]);
    }

    #[test]
    fn removing_a_producer_drops_its_edges() {
        let mut table = RelationTable::default();
        table.update_consumer(20, &consumer_state(20, vec![10]));
        table.remove_object(10);
        assert!(table.producers_of(20).is_empty());
        assert!(table.consumers_of(10).is_empty());
    }
}
