use crate::core::HistoryToken;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

type PredicateFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type ComparatorFn<E> = Arc<dyn Fn(&E, &E) -> Ordering + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Forward,
    Reverse,
}

/// One sort key of a fetch.
pub struct SortDescriptor<E> {
    comparator: ComparatorFn<E>,
    order: SortOrder,
}

impl<E> SortDescriptor<E> {
    /// Sorts ascending by the value `key` extracts.
    pub fn by_key<K, F>(key: F) -> Self
    where
        K: Ord,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        Self {
            comparator: Arc::new(move |a, b| key(a).cmp(&key(b))),
            order: SortOrder::Forward,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.order = match self.order {
            SortOrder::Forward => SortOrder::Reverse,
            SortOrder::Reverse => SortOrder::Forward,
        };
        self
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn compare(&self, a: &E, b: &E) -> Ordering {
        let ordering = (self.comparator)(a, b);
        match self.order {
            SortOrder::Forward => ordering,
            SortOrder::Reverse => ordering.reverse(),
        }
    }
}

impl<E> Clone for SortDescriptor<E> {
    fn clone(&self) -> Self {
        Self {
            comparator: Arc::clone(&self.comparator),
            order: self.order,
        }
    }
}

impl<E> fmt::Debug for SortDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortDescriptor").field("order", &self.order).finish()
    }
}

/// Filter, sort and limit of a model query.
pub struct FetchDescriptor<E> {
    predicate: Option<PredicateFn<E>>,
    sort_by: Vec<SortDescriptor<E>>,
    fetch_limit: Option<usize>,
}

impl<E> FetchDescriptor<E> {
    pub fn new() -> Self {
        Self {
            predicate: None,
            sort_by: Vec::new(),
            fetch_limit: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn sort_by(mut self, descriptor: SortDescriptor<E>) -> Self {
        self.sort_by.push(descriptor);
        self
    }

    pub fn limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = Some(fetch_limit);
        self
    }

    pub fn fetch_limit(&self) -> Option<usize> {
        self.fetch_limit
    }

    pub fn is_sorted(&self) -> bool {
        !self.sort_by.is_empty()
    }

    pub fn matches(&self, model: &E) -> bool {
        self.predicate.as_ref().is_none_or(|predicate| predicate(model))
    }

    /// Compares by each sort descriptor in turn; equal when unsorted.
    pub fn compare(&self, a: &E, b: &E) -> Ordering {
        self.sort_by
            .iter()
            .map(|descriptor| descriptor.compare(a, b))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// Filters, stably sorts and truncates `models`.
    pub fn apply(&self, models: impl IntoIterator<Item = E>) -> Vec<E> {
        let mut results: Vec<E> = models.into_iter().filter(|m| self.matches(m)).collect();
        if self.is_sorted() {
            results.sort_by(|a, b| self.compare(a, b));
        }
        if let Some(limit) = self.fetch_limit {
            results.truncate(limit);
        }
        results
    }
}

impl<E> Default for FetchDescriptor<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for FetchDescriptor<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            sort_by: self.sort_by.clone(),
            fetch_limit: self.fetch_limit,
        }
    }
}

impl<E> fmt::Debug for FetchDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchDescriptor")
            .field("has_predicate", &self.predicate.is_some())
            .field("sort_by", &self.sort_by)
            .field("fetch_limit", &self.fetch_limit)
            .finish()
    }
}

/// Selects history transactions strictly newer than a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryDescriptor {
    pub after: Option<HistoryToken>,
}

impl HistoryDescriptor {
    pub fn after(token: Option<HistoryToken>) -> Self {
        Self { after: token }
    }

    pub fn includes(&self, token: &HistoryToken) -> bool {
        self.after.is_none_or(|after| *token > after)
    }
}
