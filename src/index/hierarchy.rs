//! Identity hierarchy.
//!
//! A static DAG mapping specific identity terms to broader ones
//! (`alawite → muslim`, `sephardi → jewish`). Searching a broad identity
//! must also retrieve chunks tagged only with narrower identities, so the
//! retriever expands every query term downward before keyword lookup.
//!
//! Pure data plus expansion helpers; cycles are rejected at load time.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::IndexError;

/// Built-in specific→general edges, in canonical form.
///
/// Representative of the corpus conventions; operators can load a
/// replacement table through [`IdentityHierarchy::from_edges`].
const BUILTIN_EDGES: &[(&str, &str)] = &[
    ("alawite", "muslim"),
    ("sunni", "muslim"),
    ("shia", "muslim"),
    ("sephardi", "jewish"),
    ("ashkenazi", "jewish"),
    ("mizrahi", "jewish"),
    ("karaite", "jewish"),
    ("hausa", "black"),
    ("yoruba", "black"),
    ("igbo", "black"),
    ("mandinka", "black"),
    ("huguenot", "protestant"),
    ("quaker", "protestant"),
    ("calvinist", "protestant"),
    ("lutheran", "protestant"),
    ("protestant", "christian"),
    ("catholic", "christian"),
    ("maronite", "christian"),
    ("copt", "christian"),
    ("armenian", "christian"),
    ("parsi", "zoroastrian"),
];

/// DAG of identity terms with upward (broader) and downward (narrower)
/// adjacency. Immutable after construction.
#[derive(Debug, Clone)]
pub struct IdentityHierarchy {
    parents: HashMap<String, Vec<String>>,
    children: HashMap<String, Vec<String>>,
}

impl IdentityHierarchy {
    /// Builds the hierarchy from `(specific, general)` edges.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::HierarchyCycle`] if the edge set contains a
    /// cycle. This is fatal at init: a cyclic hierarchy would make
    /// expansion non-terminating.
    pub fn from_edges<S: AsRef<str>>(edges: &[(S, S)]) -> Result<Self, IndexError> {
        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();

        for (specific, general) in edges {
            let specific = specific.as_ref().to_string();
            let general = general.as_ref().to_string();
            parents
                .entry(specific.clone())
                .or_default()
                .push(general.clone());
            children.entry(general).or_default().push(specific);
        }

        let hierarchy = Self { parents, children };
        hierarchy.check_acyclic()?;
        Ok(hierarchy)
    }

    /// Returns the built-in corpus hierarchy.
    ///
    /// The built-in edge table is acyclic by construction and covered by
    /// tests, so this cannot fail.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_edges(BUILTIN_EDGES).unwrap_or_else(|_| Self {
            parents: HashMap::new(),
            children: HashMap::new(),
        })
    }

    /// Detects cycles by iterative DFS over the upward edges.
    fn check_acyclic(&self) -> Result<(), IndexError> {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut state: HashMap<&str, u8> = HashMap::new();

        for start in self.parents.keys() {
            if state.get(start.as_str()).copied().unwrap_or(0) != 0 {
                continue;
            }
            // (node, next child index)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            state.insert(start.as_str(), 1);

            while let Some((node, idx)) = stack.pop() {
                let ups = self.parents.get(node).map_or(&[][..], Vec::as_slice);
                if idx < ups.len() {
                    stack.push((node, idx + 1));
                    let next = ups[idx].as_str();
                    match state.get(next).copied().unwrap_or(0) {
                        1 => {
                            return Err(IndexError::HierarchyCycle {
                                term: next.to_string(),
                            });
                        }
                        0 => {
                            state.insert(next, 1);
                            stack.push((next, 0));
                        }
                        _ => {}
                    }
                } else {
                    state.insert(node, 2);
                }
            }
        }
        Ok(())
    }

    fn walk(&self, term: &str, edges: &HashMap<String, Vec<String>>) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(term);

        while let Some(current) = queue.pop_front() {
            if let Some(nexts) = edges.get(current) {
                for next in nexts {
                    if seen.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            }
        }
        seen
    }

    /// Returns all strictly narrower terms reachable from `term`.
    /// Unknown terms return the empty set.
    #[must_use]
    pub fn descendants(&self, term: &str) -> HashSet<String> {
        self.walk(term, &self.children)
    }

    /// Returns all strictly broader terms reachable from `term`.
    /// Unknown terms return the empty set.
    #[must_use]
    pub fn ancestors(&self, term: &str) -> HashSet<String> {
        self.walk(term, &self.parents)
    }

    /// Returns `{term} ∪ descendants(term)`, the set of index keys a
    /// keyword search for `term` must consult. A broad identity reaches
    /// its subcategories, never the reverse.
    #[must_use]
    pub fn expand_for_search(&self, term: &str) -> HashSet<String> {
        let mut set = self.descendants(term);
        set.insert(term.to_string());
        set
    }

    /// Returns `{term} ∪ ancestors(term)`.
    #[must_use]
    pub fn expand_up(&self, term: &str) -> HashSet<String> {
        let mut set = self.ancestors(term);
        set.insert(term.to_string());
        set
    }
}
