//! Schema Registry
//!
//! Static declaration of every entity type, its primary key and its
//! foreign-key edges. Write order for restore is derived from the required
//! edges once, at construction time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Required foreign keys form a cycle: {}", cycle.join(" -> "))]
    CyclicRequiredDependency { cycle: Vec<String> },
    #[error("Entity declared twice: {0}")]
    DuplicateEntity(String),
    #[error("Foreign key {entity}.{field} targets unknown entity {target}")]
    UnknownTarget {
        entity: String,
        field: String,
        target: String,
    },
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
}

/// A foreign-key edge from one entity's field to another entity's primary key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub field: String,
    pub target_entity: String,
    pub required: bool,
}

impl ForeignKey {
    pub fn required(field: &str, target_entity: &str) -> Self {
        Self {
            field: field.to_string(),
            target_entity: target_entity.to_string(),
            required: true,
        }
    }

    pub fn optional(field: &str, target_entity: &str) -> Self {
        Self {
            field: field.to_string(),
            target_entity: target_entity.to_string(),
            required: false,
        }
    }
}

/// Identity and outgoing edges of one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    pub name: String,
    pub primary_key: String,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl EntityDescriptor {
    pub fn new(name: &str, primary_key: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Whether an edge takes part in the topological constraint.
    /// Self references never do, whatever their `required` flag says.
    pub fn is_ordering_edge(&self, fk: &ForeignKey) -> bool {
        fk.required && fk.target_entity != self.name
    }

    /// Edges written as null on the first restore pass and patched afterwards
    pub fn deferred_edges(&self) -> impl Iterator<Item = &ForeignKey> {
        self.foreign_keys
            .iter()
            .filter(move |fk| !self.is_ordering_edge(fk))
    }
}

/// Immutable registry of all entity descriptors
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    descriptors: Vec<EntityDescriptor>,
    index: HashMap<String, usize>,
    order: Vec<String>,
    excluded: BTreeSet<String>,
}

impl SchemaRegistry {
    /// Build a registry and compute its write order.
    ///
    /// Fails if a name is declared twice, an edge targets an undeclared
    /// entity, or the required edges contain a cycle.
    pub fn new(descriptors: Vec<EntityDescriptor>) -> Result<Self, SchemaError> {
        Self::with_exclusions(descriptors, std::iter::empty::<&str>())
    }

    /// Like [`SchemaRegistry::new`], additionally marking entities that are
    /// left out of snapshots (derived or cache tables).
    pub fn with_exclusions<'a>(
        descriptors: Vec<EntityDescriptor>,
        excluded: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, SchemaError> {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (i, d) in descriptors.iter().enumerate() {
            if index.insert(d.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateEntity(d.name.clone()));
            }
        }

        for d in &descriptors {
            for fk in &d.foreign_keys {
                if !index.contains_key(&fk.target_entity) {
                    return Err(SchemaError::UnknownTarget {
                        entity: d.name.clone(),
                        field: fk.field.clone(),
                        target: fk.target_entity.clone(),
                    });
                }
            }
        }

        let mut excluded_set = BTreeSet::new();
        for name in excluded {
            if !index.contains_key(name) {
                return Err(SchemaError::UnknownEntity(name.to_string()));
            }
            excluded_set.insert(name.to_string());
        }

        let order = topological_sort(&descriptors, &index)?;

        Ok(Self {
            descriptors,
            index,
            order,
            excluded: excluded_set,
        })
    }

    pub fn describe(&self, name: &str) -> Result<&EntityDescriptor, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    /// Every entity, parents before children along required edges
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Entities that go into a snapshot, in write order
    pub fn snapshot_entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.order
            .iter()
            .filter(|name| !self.excluded.contains(name.as_str()))
            .filter_map(|name| self.get(name))
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    pub fn descriptors(&self) -> &[EntityDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Kahn's algorithm over required edges. Ties resolve in declaration order so
/// the result is stable for a given registry.
fn topological_sort(
    descriptors: &[EntityDescriptor],
    index: &HashMap<String, usize>,
) -> Result<Vec<String>, SchemaError> {
    let n = descriptors.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (child, d) in descriptors.iter().enumerate() {
        let mut parents = BTreeSet::new();
        for fk in d.foreign_keys.iter().filter(|fk| d.is_ordering_edge(fk)) {
            parents.insert(index[&fk.target_entity]);
        }
        for parent in parents {
            in_degree[child] += 1;
            dependents[parent].push(child);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        order.push(descriptors[next].name.clone());
        for &child in &dependents[next] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    let remaining: Vec<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
    Err(SchemaError::CyclicRequiredDependency {
        cycle: find_cycle(descriptors, index, &remaining),
    })
}

/// Walk required edges from a node that is still blocked until a node repeats.
/// Every blocked node has at least one blocked parent, so the walk must loop.
fn find_cycle(
    descriptors: &[EntityDescriptor],
    index: &HashMap<String, usize>,
    remaining: &[usize],
) -> Vec<String> {
    let blocked: BTreeSet<usize> = remaining.iter().copied().collect();
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    let mut path: Vec<usize> = vec![start];
    let mut current = start;
    loop {
        let d = &descriptors[current];
        let next = d
            .foreign_keys
            .iter()
            .filter(|fk| d.is_ordering_edge(fk))
            .map(|fk| index[&fk.target_entity])
            .find(|i| blocked.contains(i));

        let Some(next) = next else {
            break;
        };

        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .map(|&i| descriptors[i].name.clone())
                .collect();
            cycle.push(descriptors[next].name.clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }

    path.iter().map(|&i| descriptors[i].name.clone()).collect()
}
