//! Patch boxes and their distribution over processes

use super::index_box::{IndexBox, IntVect};
use crate::error::ConfigError;

/// The patches of one level entry and the rank owning each of them
#[derive(Debug, Clone, PartialEq)]
pub struct BoxLayout {
    boxes: Vec<IndexBox>,
    ranks: Vec<usize>,
}

impl BoxLayout {
    pub fn new(boxes: Vec<IndexBox>, ranks: Vec<usize>) -> Result<Self, ConfigError> {
        if boxes.len() != ranks.len() {
            return Err(ConfigError::LayoutMismatch(format!(
                "{} boxes but {} owner ranks",
                boxes.len(),
                ranks.len()
            )));
        }
        for (i, a) in boxes.iter().enumerate() {
            if a.is_empty() {
                return Err(ConfigError::LayoutMismatch(format!("patch {i} is empty")));
            }
            for (j, b) in boxes.iter().enumerate().skip(i + 1) {
                if a.intersect(b).is_some() {
                    return Err(ConfigError::LayoutMismatch(format!(
                        "patches {i} and {j} overlap"
                    )));
                }
            }
        }
        Ok(Self { boxes, ranks })
    }

    /// All patches on rank 0
    pub fn single_rank(boxes: Vec<IndexBox>) -> Result<Self, ConfigError> {
        let ranks = vec![0; boxes.len()];
        Self::new(boxes, ranks)
    }

    /// Consecutive runs of patches per rank, as even as possible
    pub fn contiguous(boxes: Vec<IndexBox>, nranks: usize) -> Result<Self, ConfigError> {
        let n = boxes.len();
        let nranks = nranks.max(1);
        let ranks = (0..n).map(|i| i * nranks / n.max(1)).collect();
        Self::new(boxes, ranks)
    }

    /// Split `domain` into patches of at most `max_size` cells per direction
    pub fn chop(domain: &IndexBox, max_size: i64, dim: usize) -> Vec<IndexBox> {
        let mut out = vec![*domain];
        for d in 0..dim {
            out = out
                .into_iter()
                .flat_map(|bx| {
                    let mut pieces = Vec::new();
                    let mut lo = bx.lo()[d];
                    while lo <= bx.hi()[d] {
                        let hi = (lo + max_size - 1).min(bx.hi()[d]);
                        let mut l = bx.lo();
                        let mut h = bx.hi();
                        l[d] = lo;
                        h[d] = hi;
                        pieces.push(IndexBox::new(l, h));
                        lo = hi + 1;
                    }
                    pieces
                })
                .collect();
        }
        // z slowest, x fastest
        out.sort_by_key(|b| [b.lo()[2], b.lo()[1], b.lo()[0]]);
        out
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn boxes(&self) -> &[IndexBox] {
        &self.boxes
    }

    pub fn box_at(&self, patch: usize) -> &IndexBox {
        &self.boxes[patch]
    }

    pub fn rank_of(&self, patch: usize) -> usize {
        self.ranks[patch]
    }

    /// Patches owned by `rank`, in patch order
    pub fn local_patches(&self, rank: usize) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.ranks[i] == rank).collect()
    }

    pub fn num_points(&self) -> i64 {
        self.boxes.iter().map(IndexBox::num_points).sum()
    }

    /// Same patches coarsened; the distribution is kept
    pub fn coarsen(&self, ratio: IntVect) -> BoxLayout {
        BoxLayout {
            boxes: self.boxes.iter().map(|b| b.coarsen(ratio)).collect(),
            ranks: self.ranks.clone(),
        }
    }

    pub fn coarsenable(&self, ratio: IntVect, min_width: i64, dim: usize) -> bool {
        self.boxes
            .iter()
            .all(|b| b.coarsenable(ratio, min_width, dim))
    }

    /// Whether the union of the patches is all of `domain`
    pub fn covers(&self, domain: &IndexBox) -> bool {
        let covered: i64 = self
            .boxes
            .iter()
            .filter_map(|b| b.intersect(domain))
            .map(|b| b.num_points())
            .sum();
        covered == domain.num_points()
    }

    /// Patches intersecting `region`
    pub fn intersecting(&self, region: &IndexBox) -> Vec<(usize, IndexBox)> {
        self.boxes
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.intersect(region).map(|r| (i, r)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chop_and_distribute() {
        let domain = IndexBox::from_size(&[8, 8]);
        let boxes = BoxLayout::chop(&domain, 4, 2);
        assert_eq!(boxes.len(), 4);
        assert_eq!(boxes[1], IndexBox::new([4, 0, 0], [7, 3, 0]));

        let layout = BoxLayout::contiguous(boxes, 2).unwrap();
        assert_eq!(layout.local_patches(0), vec![0, 1]);
        assert_eq!(layout.local_patches(1), vec![2, 3]);
        assert!(layout.covers(&domain));
        assert_eq!(layout.num_points(), 64);
    }

    #[test]
    fn test_rejects_overlap_and_mismatch() {
        let a = IndexBox::from_size(&[4, 4]);
        let b = IndexBox::new([3, 3, 0], [5, 5, 0]);
        assert!(matches!(
            BoxLayout::single_rank(vec![a, b]),
            Err(ConfigError::LayoutMismatch(_))
        ));
        assert!(BoxLayout::new(vec![a], vec![0, 1]).is_err());
    }

    #[test]
    fn test_partial_cover() {
        let domain = IndexBox::from_size(&[8, 8]);
        let layout = BoxLayout::single_rank(vec![IndexBox::from_size(&[4, 8])]).unwrap();
        assert!(!layout.covers(&domain));
        assert_eq!(layout.intersecting(&IndexBox::new([3, 0, 0], [5, 0, 0])).len(), 1);
    }
}
