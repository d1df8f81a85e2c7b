use crate::block::{ContentBlock, join_markup};
use crate::error::NewsprintError;
use crate::measure::{Measure, StyleContext};
use crate::types::Px;
use std::collections::VecDeque;

/// Height budget of one slot, measured at `width` under `style`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capacity {
    pub height: Px,
    /// Kept free at the bottom for fixed adornments such as "continued" markers.
    pub reserve: Px,
    pub width: Px,
    pub style: StyleContext,
}

impl Capacity {
    pub fn new(height: Px, width: Px) -> Self {
        Self {
            height,
            reserve: Px::ZERO,
            width,
            style: StyleContext::default(),
        }
    }

    pub fn with_reserve(mut self, reserve: Px) -> Self {
        self.reserve = reserve;
        self
    }

    pub fn with_style(mut self, style: StyleContext) -> Self {
        self.style = style;
        self
    }

    /// Height available to content.
    pub fn budget(&self) -> Px {
        (self.height - self.reserve).max(Px::ZERO)
    }
}

/// How strictly a slot is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitPolicy {
    /// Exact budget with word-level splitting of paragraphs.
    Strict,
    /// Whole blocks only, against a fraction of the budget, with a tighter
    /// fraction once a slot holds many elements.
    Flow {
        threshold_pct: i32,
        crowded_count: usize,
        crowded_pct: i32,
    },
}

impl FitPolicy {
    pub const fn flow() -> Self {
        FitPolicy::Flow {
            threshold_pct: 98,
            crowded_count: 50,
            crowded_pct: 90,
        }
    }

    fn splits_words(self) -> bool {
        matches!(self, FitPolicy::Strict)
    }

    fn accepts(self, height: Px, elements: usize, budget: Px) -> bool {
        match self {
            FitPolicy::Strict => height <= budget,
            FitPolicy::Flow {
                threshold_pct,
                crowded_count,
                crowded_pct,
            } => {
                if height > budget.percent(threshold_pct) {
                    return false;
                }
                !(elements > crowded_count && height > budget.percent(crowded_pct))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub fitted: Vec<ContentBlock>,
    pub remainder: Vec<ContentBlock>,
    /// Measured height of `fitted`.
    pub height: Px,
    /// The first block was placed whole although it exceeds the budget.
    pub oversized: bool,
    /// The last fitted block is the head of a word-level split.
    pub split: bool,
}

impl FitResult {
    pub fn is_complete(&self) -> bool {
        self.remainder.is_empty()
    }
}

pub enum AddResult {
    Placed,
    Split(ContentBlock),
    Overflow(ContentBlock),
}

/// A single capacity unit being filled front to back.
pub struct Slot<'a> {
    capacity: &'a Capacity,
    policy: FitPolicy,
    placed: Vec<ContentBlock>,
    height: Px,
    oversized: bool,
    split: bool,
}

impl<'a> Slot<'a> {
    pub fn new(capacity: &'a Capacity, policy: FitPolicy) -> Self {
        Self {
            capacity,
            policy,
            placed: Vec::new(),
            height: Px::ZERO,
            oversized: false,
            split: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.placed.is_empty()
    }

    pub fn height(&self) -> Px {
        self.height
    }

    fn measure_with(
        &self,
        extra: &ContentBlock,
        measure: &dyn Measure,
    ) -> Result<Px, NewsprintError> {
        let mut markup = join_markup(&self.placed);
        markup.push_str(extra.markup());
        measure.measure(&markup, self.capacity.width, &self.capacity.style)
    }

    fn accepts(&self, height: Px) -> bool {
        self.policy
            .accepts(height, self.placed.len() + 1, self.capacity.budget())
    }

    pub fn add(
        &mut self,
        block: ContentBlock,
        measure: &dyn Measure,
    ) -> Result<AddResult, NewsprintError> {
        let height = self.measure_with(&block, measure)?;
        if self.accepts(height) {
            self.height = height;
            self.placed.push(block);
            return Ok(AddResult::Placed);
        }

        if self.policy.splits_words() && block.kind.is_paragraph_like() {
            if let Some((head, tail, head_height)) = self.largest_fitting_head(&block, measure)? {
                log::trace!(
                    "split paragraph at {} of {} words",
                    head.word_count(),
                    block.word_count()
                );
                self.height = head_height;
                self.placed.push(head);
                self.split = true;
                return Ok(AddResult::Split(tail));
            }
        }

        // A block that cannot fit an empty slot is placed anyway so the
        // caller always makes progress.
        if self.is_empty() {
            self.height = height;
            self.placed.push(block);
            self.oversized = true;
            return Ok(AddResult::Placed);
        }

        Ok(AddResult::Overflow(block))
    }

    fn largest_fitting_head(
        &self,
        block: &ContentBlock,
        measure: &dyn Measure,
    ) -> Result<Option<(ContentBlock, ContentBlock, Px)>, NewsprintError> {
        let mut head_height = Px::ZERO;
        let found = largest_head(block, |head| {
            let height = self.measure_with(head, measure)?;
            let fits = self.accepts(height);
            if fits {
                head_height = height;
            }
            Ok(fits)
        })?;
        Ok(found.map(|(head, tail)| (head, tail, head_height)))
    }

    pub fn finish(self, remainder: Vec<ContentBlock>) -> FitResult {
        FitResult {
            fitted: self.placed,
            remainder,
            height: self.height,
            oversized: self.oversized,
            split: self.split,
        }
    }
}

/// Largest word prefix of a paragraph that `accepts`, with the rest of it.
/// Binary search over the word count; acceptance must be monotonic in words.
pub(crate) fn largest_head<F>(
    block: &ContentBlock,
    mut accepts: F,
) -> Result<Option<(ContentBlock, ContentBlock)>, NewsprintError>
where
    F: FnMut(&ContentBlock) -> Result<bool, NewsprintError>,
{
    let words = block.word_count();
    if words < 2 {
        return Ok(None);
    }
    let mut lo = 0usize;
    let mut hi = words - 1;
    let mut best = None;
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        let Some((head, tail)) = block.split_at_word(mid) else {
            hi = mid - 1;
            continue;
        };
        if accepts(&head)? {
            lo = mid;
            best = Some((head, tail));
        } else {
            hi = mid - 1;
        }
    }
    Ok(best)
}

/// Fits the longest leading run of `blocks` into `capacity`, splitting the
/// first overflowing paragraph at a word boundary.
pub fn fit(
    blocks: Vec<ContentBlock>,
    capacity: &Capacity,
    measure: &dyn Measure,
) -> Result<FitResult, NewsprintError> {
    fit_with_policy(blocks, capacity, measure, FitPolicy::Strict)
}

pub fn fit_with_policy(
    blocks: Vec<ContentBlock>,
    capacity: &Capacity,
    measure: &dyn Measure,
    policy: FitPolicy,
) -> Result<FitResult, NewsprintError> {
    let mut queue: VecDeque<ContentBlock> = blocks.into();
    let mut slot = Slot::new(capacity, policy);
    while let Some(block) = queue.pop_front() {
        match slot.add(block, measure)? {
            AddResult::Placed => {}
            AddResult::Split(rest) | AddResult::Overflow(rest) => {
                queue.push_front(rest);
                break;
            }
        }
    }
    Ok(slot.finish(queue.into()))
}

/// Height of `blocks` laid out together in `capacity`.
pub fn measure_blocks(
    blocks: &[ContentBlock],
    capacity: &Capacity,
    measure: &dyn Measure,
) -> Result<Px, NewsprintError> {
    measure.measure(&join_markup(blocks), capacity.width, &capacity.style)
}
