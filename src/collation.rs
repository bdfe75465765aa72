use std::cmp::Ordering;

use icu_collator::{Collator, CollatorOptions};
use icu_locid::locale;
use tracing::warn;

/// Name ordering used for every student list: Traditional Chinese (zh-TW)
/// stroke collation, code point order if the locale data cannot be loaded.
pub struct NameCollator {
    inner: Option<Collator>,
}

impl NameCollator {
    pub fn zh_tw() -> Self {
        match Collator::try_new(&locale!("zh-TW-u-co-stroke").into(), CollatorOptions::new()) {
            Ok(collator) => Self {
                inner: Some(collator),
            },
            Err(e) => {
                warn!("zh-TW collation unavailable, using code point order: {e}");
                Self { inner: None }
            }
        }
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        let primary = match &self.inner {
            Some(collator) => collator.compare(a, b),
            None => Ordering::Equal,
        };
        primary.then_with(|| a.cmp(b))
    }
}

/// Sorts by class, then student name.
pub fn sort_by_class_and_name<T>(items: &mut [T], key: impl Fn(&T) -> (&str, &str)) {
    let collator = NameCollator::zh_tw();
    items.sort_by(|a, b| {
        let (a_class, a_name) = key(a);
        let (b_class, b_name) = key(b);
        collator
            .compare(a_class, b_class)
            .then_with(|| collator.compare(a_name, b_name))
    });
}

pub fn sort_names(names: &mut [String]) {
    let collator = NameCollator::zh_tw();
    names.sort_by(|a, b| collator.compare(a, b));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_takes_precedence_over_name() {
        let mut rows = vec![("C2", "Anna"), ("C1", "Zoe"), ("C1", "Ben")];
        sort_by_class_and_name(&mut rows, |r| (r.0, r.1));
        assert_eq!(rows, vec![("C1", "Ben"), ("C1", "Zoe"), ("C2", "Anna")]);
    }

    #[test]
    fn identical_names_stay_equal() {
        let collator = NameCollator::zh_tw();
        assert_eq!(collator.compare("陳小明", "陳小明"), Ordering::Equal);
        assert_ne!(collator.compare("陳小明", "林美華"), Ordering::Equal);
    }

    #[test]
    fn chinese_names_sort_by_stroke_count() {
        let mut names: Vec<String> = ["陳小明", "張家豪", "林美華", "李安妮", "王大同"]
            .iter()
            .map(|n| n.to_string())
            .collect();
        sort_names(&mut names);
        assert_eq!(names, vec!["王大同", "李安妮", "林美華", "張家豪", "陳小明"]);
    }

    #[test]
    fn latin_names_ignore_case_first() {
        let mut names = vec!["bob".to_string(), "Alice".to_string(), "alice".to_string()];
        sort_names(&mut names);
        assert_eq!(names[2], "bob");
    }
}
