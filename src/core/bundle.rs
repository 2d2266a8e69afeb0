//! Resource bundle: the ordered, validated set of resources for one run.
//!
//! Resources keep their declaration order. Execution order is a topological
//! sort of the declared dependency edges (Kahn's algorithm) that always
//! picks the earliest-declared ready resource, so independent resources run
//! in the order they were written.

use super::error::{Error, Result};
use super::types::{Resource, ResourceId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Default)]
pub struct ResourceBundle {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
}

impl ResourceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize a sequence of resources into a bundle.
    pub fn from_resources<I>(resources: I) -> Result<Self>
    where
        I: IntoIterator<Item = Resource>,
    {
        let mut bundle = Self::new();
        for resource in resources {
            bundle.add(resource)?;
        }
        Ok(bundle)
    }

    /// Materialize a fallible resource sequence. The first error stops
    /// construction and is returned as-is.
    pub fn try_collect<I>(resources: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Resource>>,
    {
        let mut bundle = Self::new();
        for resource in resources {
            bundle.add(resource?)?;
        }
        Ok(bundle)
    }

    /// Append a resource. Identities are unique per bundle.
    pub fn add(&mut self, resource: Resource) -> Result<()> {
        if self.index.contains_key(resource.id()) {
            return Err(Error::DuplicateResource(resource.id().clone()));
        }
        self.index.insert(resource.id().clone(), self.resources.len());
        self.resources.push(resource);
        Ok(())
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Check that every dependency reference names a resource in the bundle.
    pub fn check_dependencies(&self) -> Result<()> {
        for resource in &self.resources {
            for dep in resource.dependencies() {
                if !self.contains(dep) {
                    return Err(Error::UnresolvedDependency {
                        resource: resource.id().clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Dependency-respecting execution order.
    ///
    /// Fails with [`Error::UnresolvedDependency`] for a reference to an
    /// unknown resource and [`Error::CircularDependency`] (listing every
    /// resource that could not be ordered, in declaration order) for a
    /// cycle.
    pub fn execution_order(&self) -> Result<Vec<&Resource>> {
        self.check_dependencies()?;

        let n = self.resources.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, resource) in self.resources.iter().enumerate() {
            for dep in resource.dependencies() {
                let d = self.index[dep];
                dependents[d].push(i);
                in_degree[i] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(current)) = ready.pop() {
            order.push(current);
            for &next in &dependents[current] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != n {
            let members = (0..n)
                .filter(|i| in_degree[*i] > 0)
                .map(|i| self.resources[i].id().clone())
                .collect();
            return Err(Error::CircularDependency { members });
        }

        Ok(order.into_iter().map(|i| &self.resources[i]).collect())
    }
}

impl<'a> IntoIterator for &'a ResourceBundle {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dir(name: &str) -> Resource {
        Resource::new("directory", name)
    }

    fn dir_id(name: &str) -> ResourceId {
        ResourceId::new("directory", name)
    }

    fn names(order: &[&Resource]) -> Vec<String> {
        order.iter().map(|r| r.name().to_string()).collect()
    }

    #[test]
    fn test_bundle_duplicate_rejected() {
        let mut bundle = ResourceBundle::new();
        bundle.add(dir("/srv")).unwrap();
        let err = bundle.add(dir("/srv").with_attr("mode", "0700")).unwrap_err();
        assert!(matches!(err, Error::DuplicateResource(ref id) if id == &dir_id("/srv")));
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn test_bundle_same_name_different_type_allowed() {
        let bundle = ResourceBundle::from_resources([
            dir("/srv/app"),
            Resource::new("checkout", "/srv/app"),
        ])
        .unwrap();
        assert_eq!(bundle.len(), 2);
    }

    #[test]
    fn test_bundle_declaration_order_without_dependencies() {
        let bundle = ResourceBundle::from_resources([dir("/c"), dir("/a"), dir("/b")]).unwrap();
        let order = bundle.execution_order().unwrap();
        assert_eq!(names(&order), vec!["/c", "/a", "/b"]);
    }

    #[test]
    fn test_bundle_dependency_moves_ahead() {
        let bundle = ResourceBundle::from_resources([
            dir("/srv/app").depends_on(dir_id("/srv")),
            dir("/tmp/x"),
            dir("/srv"),
        ])
        .unwrap();
        let order = bundle.execution_order().unwrap();
        assert_eq!(names(&order), vec!["/tmp/x", "/srv", "/srv/app"]);
    }

    #[test]
    fn test_bundle_unresolved_dependency() {
        let bundle =
            ResourceBundle::from_resources([dir("/srv/app").depends_on(dir_id("/srv"))]).unwrap();
        let err = bundle.execution_order().unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedDependency { ref resource, ref dependency }
                if resource == &dir_id("/srv/app") && dependency == &dir_id("/srv")
        ));
    }

    #[test]
    fn test_bundle_cycle_detected() {
        let bundle = ResourceBundle::from_resources([
            dir("/ok"),
            dir("/a").depends_on(dir_id("/b")),
            dir("/b").depends_on(dir_id("/a")),
            dir("/c").depends_on(dir_id("/b")),
        ])
        .unwrap();
        match bundle.execution_order().unwrap_err() {
            Error::CircularDependency { members } => {
                assert_eq!(members, vec![dir_id("/a"), dir_id("/b"), dir_id("/c")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bundle_self_dependency_is_cycle() {
        let bundle =
            ResourceBundle::from_resources([dir("/a").depends_on(dir_id("/a"))]).unwrap();
        assert!(matches!(
            bundle.execution_order(),
            Err(Error::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_bundle_try_collect_propagates_sequence_error() {
        let items = vec![
            Ok(dir("/a")),
            Err(Error::Parse("generator failed".into())),
            Ok(dir("/b")),
        ];
        let err = ResourceBundle::try_collect(items).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_bundle_get_and_iter() {
        let bundle = ResourceBundle::from_resources([dir("/a"), dir("/b")]).unwrap();
        assert!(bundle.get(&dir_id("/b")).is_some());
        assert!(bundle.get(&dir_id("/z")).is_none());
        let declared: Vec<&str> = (&bundle).into_iter().map(|r| r.name()).collect();
        assert_eq!(declared, vec!["/a", "/b"]);
    }

    fn arb_dag() -> impl Strategy<Value = (Vec<Vec<prop::sample::Index>>, Vec<usize>)> {
        (1usize..12).prop_flat_map(|n| {
            (
                prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), n),
                Just((0..n).collect::<Vec<usize>>()).prop_shuffle(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_dependencies_always_precede_dependents((edges, declared) in arb_dag()) {
            // Node i may only depend on nodes < i, so the graph is acyclic.
            let deps_of = |i: usize| -> Vec<usize> {
                if i == 0 { return Vec::new(); }
                edges[i].iter().map(|idx| idx.index(i)).collect()
            };
            let resources = declared.iter().map(|&i| {
                deps_of(i).into_iter().fold(dir(&format!("/r{i}")), |r, d| {
                    r.depends_on(dir_id(&format!("/r{d}")))
                })
            });
            let bundle = ResourceBundle::from_resources(resources).unwrap();
            let order = bundle.execution_order().unwrap();
            prop_assert_eq!(order.len(), declared.len());

            let position: HashMap<String, usize> = order
                .iter()
                .enumerate()
                .map(|(pos, r)| (r.name().to_string(), pos))
                .collect();
            for i in 0..declared.len() {
                for d in deps_of(i) {
                    let dep_key = format!("/r{d}");
                    let key = format!("/r{i}");
                    prop_assert!(position[&dep_key] < position[&key]);
                }
            }
        }
    }
}
