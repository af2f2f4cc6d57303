//! Binary peak-tree construction, traversal and level-order id assignment.
//!
//! The tree of one spectrum is built top-down: the root spans the outer
//! hull of all noise-separated peaks, noise-gap splits insert the coarsest
//! sibling pairs, and interior local minima refine them. Both insertion
//! paths share the same discipline: descend into the unique child that
//! contains the new split, otherwise insert here, gated by a prominence
//! filter.

use std::collections::{BTreeMap, HashMap};

use crate::moments::{calc_moments, Moments};
use crate::peaks::{detect_peaks, find_minima, gap_split_pairs, PeakBounds};
use crate::spectrum::Spectrum;
use crate::units::{fill_where, lin2z, masked_fill};

/// Errors from tree construction. These indicate a violated construction
/// invariant rather than bad input data; the assembly layer logs them and
/// treats the affected cell as empty.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// A local minimum was inserted outside the bounds of the target node.
    #[error("minimum bin {index} outside node bounds {bounds:?}")]
    MinimumOutOfBounds {
        /// Offending bin index.
        index: usize,
        /// Bounds of the node the minimum was offered to.
        bounds: PeakBounds,
    },
}

/// One node of the peak tree, owning its children.
#[derive(Debug, Clone)]
pub struct Node {
    /// Inclusive bin bounds on the (reversed) velocity axis.
    pub bounds: PeakBounds,
    /// Reflectivity level separating this node from its sibling; the noise
    /// threshold at the root.
    pub threshold: f64,
    /// Slice of the reflectivity spectrum captured at construction.
    pub spec: Vec<f64>,
    /// Depth, 0 at the root.
    pub level: u32,
    /// Zero or exactly two children.
    pub children: Vec<Node>,
    /// Prominence gate in dB applied to every insertion below this node.
    pub prom_filter: f64,
}

impl Node {
    /// Construct the root node over the outer peak hull.
    pub fn new_root(bounds: PeakBounds, spec_chunk: Vec<f64>, noise_thres: f64) -> Self {
        Self::new(bounds, spec_chunk, noise_thres, 0)
    }

    fn new(bounds: PeakBounds, spec_chunk: Vec<f64>, threshold: f64, level: u32) -> Self {
        Self {
            bounds,
            threshold,
            spec: spec_chunk,
            level,
            children: Vec::new(),
            // TODO evaluate a 2 dB gate (Shupe 2004) against multi-layer cases
            prom_filter: 1.0,
        }
    }

    fn chunk(&self, bounds: PeakBounds) -> &[f64] {
        &self.spec[bounds.0 - self.bounds.0..bounds.1 + 1 - self.bounds.0]
    }

    /// Prominence in dB of the chunk maximum above `thres`. A NaN bin
    /// anywhere in the chunk makes the maximum NaN, so a hull spanning
    /// invalid bins never clears the gate.
    fn prominence_db(chunk: &[f64], thres: f64) -> f64 {
        let max = if chunk.iter().any(|v| v.is_nan()) {
            f64::NAN
        } else {
            chunk.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        };
        lin2z(max / thres)
    }

    /// Insert a noise-separated sibling pair with hulls `bounds_left` and
    /// `bounds_right`, separated at reflectivity `thres`.
    ///
    /// Descends into the unique child containing both hulls; otherwise the
    /// pair is inserted here if both sides clear the prominence gate, and
    /// silently dropped if not.
    pub fn add_noise_sep(&mut self, bounds_left: PeakBounds, bounds_right: PeakBounds, thres: f64) {
        let fitting: Vec<usize> = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.bounds.0 <= bounds_left.0 && c.bounds.1 >= bounds_right.1)
            .map(|(i, _)| i)
            .collect();
        if fitting.len() == 1 {
            self.children[fitting[0]].add_noise_sep(bounds_left, bounds_right, thres);
            return;
        }
        let prom_left = Self::prominence_db(self.chunk(bounds_left), thres);
        let prom_right = Self::prominence_db(self.chunk(bounds_right), thres);
        if prom_left > self.prom_filter && prom_right > self.prom_filter {
            let level = self.level + 1;
            let left = Node::new(bounds_left, self.chunk(bounds_left).to_vec(), thres, level);
            let right = Node::new(bounds_right, self.chunk(bounds_right).to_vec(), thres, level);
            self.children.push(left);
            self.children.push(right);
        } else {
            log::debug!(
                "omitted noise separated pair at {:?} {:?} ({:.2} dB, {:.2} dB)",
                bounds_left,
                bounds_right,
                prom_left,
                prom_right
            );
        }
    }

    /// Insert a split at the local minimum `index`, whose reflectivity
    /// `thres` separates the two halves.
    pub fn add_min(&mut self, index: usize, thres: f64, ignore_prom: bool) -> Result<(), TreeError> {
        if index < self.bounds.0 || index > self.bounds.1 {
            return Err(TreeError::MinimumOutOfBounds {
                index,
                bounds: self.bounds,
            });
        }
        let fitting: Vec<usize> = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.bounds.0 <= index && c.bounds.1 >= index)
            .map(|(i, _)| i)
            .collect();
        if fitting.len() == 1 {
            return self.children[fitting[0]].add_min(index, thres, false);
        }
        let bounds_left = (self.bounds.0, index);
        let bounds_right = (index, self.bounds.1);
        let prom_left = Self::prominence_db(self.chunk(bounds_left), thres);
        let prom_right = Self::prominence_db(self.chunk(bounds_right), thres);
        if (prom_left > self.prom_filter && prom_right > self.prom_filter) || ignore_prom {
            let level = self.level + 1;
            let left = Node::new(bounds_left, self.chunk(bounds_left).to_vec(), thres, level);
            let right = Node::new(bounds_right, self.chunk(bounds_right).to_vec(), thres, level);
            self.children.push(left);
            self.children.push(right);
        } else {
            log::debug!(
                "omitted minimum split at {} within {:?} ({:.2} dB, {:.2} dB)",
                index,
                self.bounds,
                prom_left,
                prom_right
            );
        }
        Ok(())
    }
}

/// One node of the flattened (traversed) tree, keyed by level-order id.
#[derive(Debug, Clone, Default)]
pub struct TravNode {
    /// Path of child indices from the root; `[0]` denotes the root itself.
    pub coords: Vec<u8>,
    /// Inclusive bin bounds.
    pub bounds: PeakBounds,
    /// Separating reflectivity threshold, linear units.
    pub thres: f64,
    /// Level-order id of the parent, `-1` for the root.
    pub parent_id: i64,
    /// Statistical moments of the sub-peak.
    pub moments: Moments,
}

/// Traversed tree of one spectrum, keyed by level-order id.
pub type TravTree = BTreeMap<usize, TravNode>;

/// Level-order id of a node in the implicit full binary tree addressed by
/// `coords` (root `[0]`, then child indices).
///
/// ```
/// use peaktree::tree::full_tree_id;
/// assert_eq!(full_tree_id(&[0]), 0);
/// assert_eq!(full_tree_id(&[0, 1]), 2);
/// assert_eq!(full_tree_id(&[0, 0, 0]), 3);
/// assert_eq!(full_tree_id(&[0, 1, 1, 0]), 13);
/// ```
pub fn full_tree_id(coords: &[u8]) -> usize {
    let mut id = (1usize << (coords.len() - 1)) - 1;
    for (k, &flag) in coords.iter().rev().enumerate() {
        if flag == 1 {
            id += 1 << k;
        }
    }
    id
}

struct RawTrav {
    coords: Vec<u8>,
    bounds: PeakBounds,
    thres: f64,
}

fn traverse(node: &Node, coords: Vec<u8>, out: &mut Vec<RawTrav>) {
    out.push(RawTrav {
        coords: coords.clone(),
        bounds: node.bounds,
        thres: node.threshold,
    });
    for (i, child) in node.children.iter().enumerate() {
        let mut child_coords = coords.clone();
        child_coords.push(i as u8);
        traverse(child, child_coords, out);
    }
}

/// Flatten a built tree into level-order-id keyed form with parent links.
pub fn traverse_tree(root: &Node) -> TravTree {
    let mut raw = Vec::new();
    traverse(root, vec![0], &mut raw);

    let mut ids_by_coords: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut tree = TravTree::new();
    for node in raw {
        let id = full_tree_id(&node.coords);
        let parent_id = if node.coords.len() > 1 {
            ids_by_coords
                .get(&node.coords[..node.coords.len() - 1])
                .map(|&p| p as i64)
                .unwrap_or(-1)
        } else {
            -1
        };
        ids_by_coords.insert(node.coords.clone(), id);
        tree.insert(
            id,
            TravNode {
                coords: node.coords,
                bounds: node.bounds,
                thres: node.thres,
                parent_id,
                moments: Moments::default(),
            },
        );
    }
    tree
}

/// Build the peak tree of a prepared spectrum and return its traversed
/// form with moments attached. An empty peak list yields an empty tree.
pub fn tree_from_spectrum(spectrum: &Spectrum) -> Result<TravTree, TreeError> {
    let masked_z = masked_fill(&spectrum.spec_z, &spectrum.spec_z_mask, 0.0);
    let peak_ind = detect_peaks(&masked_z, spectrum.noise_thres);
    if peak_ind.is_empty() {
        return Ok(TravTree::new());
    }

    let outer = (peak_ind[0].0, peak_ind[peak_ind.len() - 1].1);
    let mut root = Node::new_root(
        outer,
        spectrum.spec_z[outer.0..=outer.1].to_vec(),
        spectrum.noise_thres,
    );
    for (left_hull, right_hull) in gap_split_pairs(&peak_ind) {
        root.add_noise_sep(left_hull, right_hull, spectrum.noise_thres);
    }

    // minima only matter inside the main peaks; bins below the floor are
    // flattened so run edges do not register as dips
    let floor = spectrum.noise_thres * 1.1;
    let minima_input = fill_where(&masked_z, |v| v < floor, 1e-30);
    for (index, value) in find_minima(&minima_input) {
        if value > floor {
            root.add_min(index, value, false)?;
        }
    }

    let mut tree = traverse_tree(&root);
    for node in tree.values_mut() {
        node.moments = calc_moments(spectrum, node.bounds, node.thres);
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::tests::spectrum_from_z;

    #[test]
    fn full_tree_id_examples() {
        assert_eq!(full_tree_id(&[0]), 0);
        assert_eq!(full_tree_id(&[0, 0]), 1);
        assert_eq!(full_tree_id(&[0, 1]), 2);
        assert_eq!(full_tree_id(&[0, 0, 0]), 3);
        assert_eq!(full_tree_id(&[0, 1, 1, 0]), 13);
    }

    /// Two bumps separated by a noise-level gap become a root plus two
    /// leaves via the noise-gap path.
    #[test]
    fn noise_gap_split() {
        let mut z = vec![1e-10; 32];
        for (i, v) in [(5, 1e-5), (6, 3e-5), (7, 1e-5), (20, 2e-5), (21, 6e-5), (22, 2e-5)] {
            z[i] = v;
        }
        let spectrum = spectrum_from_z(z, 1e-9);
        let tree = tree_from_spectrum(&spectrum).unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree[&0].bounds, (5, 22));
        assert_eq!(tree[&0].parent_id, -1);
        assert_eq!(tree[&1].bounds, (5, 7));
        assert_eq!(tree[&2].bounds, (20, 22));
        assert_eq!(tree[&1].parent_id, 0);
        assert_eq!(tree[&2].parent_id, 0);
        // hulls disjoint
        assert!(tree[&1].bounds.1 < tree[&2].bounds.0);
    }

    /// Two bumps sharing a shoulder above the minima floor split at the
    /// local minimum; the split bin is shared by both leaves.
    #[test]
    fn local_minimum_split() {
        let mut z = vec![1e-10; 24];
        for (i, v) in [
            (8, 2e-5),
            (9, 8e-5),
            (10, 2e-5),
            (11, 1e-6),
            (12, 3e-5),
            (13, 9e-5),
            (14, 3e-5),
        ] {
            z[i] = v;
        }
        let spectrum = spectrum_from_z(z, 1e-9);
        let tree = tree_from_spectrum(&spectrum).unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree[&0].bounds, (8, 14));
        assert_eq!(tree[&1].bounds, (8, 11));
        assert_eq!(tree[&2].bounds, (11, 14));
        assert_eq!(tree[&1].bounds.1, tree[&2].bounds.0);
        assert!((tree[&1].thres - 1e-6).abs() < 1e-18);
    }

    /// A shoulder below the 1 dB prominence gate does not split.
    #[test]
    fn weak_shoulder_is_not_split() {
        let mut z = vec![1e-10; 24];
        for (i, v) in [
            (8, 2e-5),
            (9, 8e-5),
            (10, 7.5e-5),
            (11, 8.5e-5),
            (12, 2e-5),
        ] {
            z[i] = v;
        }
        let spectrum = spectrum_from_z(z, 1e-9);
        let tree = tree_from_spectrum(&spectrum).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[&0].bounds, (8, 12));
    }

    /// A flat spectrum below the threshold produces an empty tree.
    #[test]
    fn constant_floor_yields_empty_tree() {
        let spectrum = spectrum_from_z(vec![1e-30; 64], 1e-20);
        let tree = tree_from_spectrum(&spectrum).unwrap();
        assert!(tree.is_empty());
    }

    /// Structural invariants over a nested spectrum: two-child rule,
    /// shrinking bounds, parent links, id consistency.
    #[test]
    fn tree_invariants() {
        let mut z = vec![1e-10; 64];
        // two noise-separated groups, the right one carrying an interior dip
        for (i, v) in [(4, 2e-5), (5, 5e-5), (6, 2e-5)] {
            z[i] = v;
        }
        for (i, v) in [
            (30, 3e-5),
            (31, 9e-5),
            (32, 3e-5),
            (33, 2e-6),
            (34, 4e-5),
            (35, 1e-4),
            (36, 4e-5),
        ] {
            z[i] = v;
        }
        let spectrum = spectrum_from_z(z, 1e-9);
        let tree = tree_from_spectrum(&spectrum).unwrap();
        assert!(tree.len() >= 5);

        for (&id, node) in &tree {
            assert_eq!(id, full_tree_id(&node.coords));
            let children: Vec<_> = tree
                .values()
                .filter(|c| c.parent_id == id as i64)
                .collect();
            assert!(children.len() == 0 || children.len() == 2);
            for child in &children {
                assert!(node.bounds.0 <= child.bounds.0);
                assert!(child.bounds.1 <= node.bounds.1);
                assert!(child.bounds.1 - child.bounds.0 < node.bounds.1 - node.bounds.0);
                assert_eq!(&child.coords[..child.coords.len() - 1], &node.coords[..]);
            }
            if children.len() == 2 {
                assert!(children[0].bounds.1 <= children[1].bounds.0);
            }
            if node.parent_id >= 0 {
                assert!(tree.contains_key(&(node.parent_id as usize)));
            } else {
                assert_eq!(id, 0);
            }
        }
    }

    /// Splitting at a shared minimum bin double-counts that bin, so the
    /// parent's integrated reflectivity is the children's sum minus it.
    #[test]
    fn split_bin_double_count() {
        let mut z = vec![1e-10; 24];
        for (i, v) in [
            (8, 2e-5),
            (9, 8e-5),
            (10, 2e-5),
            (11, 1e-6),
            (12, 3e-5),
            (13, 9e-5),
            (14, 3e-5),
        ] {
            z[i] = v;
        }
        let spectrum = spectrum_from_z(z.clone(), 1e-9);
        let tree = tree_from_spectrum(&spectrum).unwrap();
        let m = tree[&1].bounds.1;
        let reconstructed = tree[&1].moments.z + tree[&2].moments.z - spectrum.spec_z[m];
        assert!((tree[&0].moments.z - reconstructed).abs() < 1e-12);
    }

    #[test]
    fn minimum_outside_bounds_is_an_error() {
        let mut root = Node::new_root((4, 10), vec![1.0; 7], 0.1);
        assert!(root.add_min(2, 0.5, false).is_err());
        assert!(root.add_min(11, 0.5, false).is_err());
    }

    /// An invalid bin inside a hull makes its prominence NaN, so the
    /// split is dropped even though the valid bins would clear the gate.
    #[test]
    fn nan_bin_in_a_chunk_blocks_the_split() {
        let spec = vec![1e-5, 2e-5, f64::NAN, 1e-6, 3e-5, 1e-5];
        let mut root = Node::new_root((0, 5), spec, 1e-9);
        root.add_min(3, 1e-6, false).unwrap();
        assert!(root.children.is_empty());
    }
}
