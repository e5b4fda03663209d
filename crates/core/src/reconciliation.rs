use crate::model::{Book, Chapter};

/// Outcome of reconciling one or more freshly fetched chapter pages against
/// the currently stored book.
pub struct Reconciliation {
    pub book: Book,
    pub chapters_to_upsert: Vec<Chapter>,
    pub advanced: bool,
}

/// Pure policy: given the current `Book` record and newly fetched chapters
/// from one or more pages, decides the updated book (or unchanged) and the
/// set of chapters to upsert. Never decreases `last_chapter_number`.
pub fn reconcile(book: &Book, fetched: &[Chapter]) -> Reconciliation {
    let observed_max = fetched.iter().map(|c| c.number).max();

    let mut updated = book.clone();
    let mut advanced = false;

    if let Some(observed_max) = observed_max {
        if observed_max > updated.last_chapter_number {
            if let Some(top) = fetched.iter().find(|c| c.number == observed_max) {
                updated.last_chapter_number = observed_max;
                updated.last_chapter_title = Some(top.title.clone());
                updated.last_chapter_url = Some(top.upstream_url.clone());
                advanced = true;
            }
        }
    }

    Reconciliation {
        book: updated,
        chapters_to_upsert: fetched.to_vec(),
        advanced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookId, PublicId};
    use proptest::prelude::*;

    fn book_with_last_chapter(n: i64) -> Book {
        let mut book = Book::new_stub(BookId::from("b1"), PublicId::from("p1"));
        book.last_chapter_number = n;
        book
    }

    fn chapter(number: i64) -> Chapter {
        Chapter {
            book_id: BookId::from("b1"),
            number,
            title: format!("Chapter {number}"),
            upstream_url: format!("https://example.test/{number}"),
            public_id: None,
        }
    }

    #[test]
    fn advances_last_chapter_when_observed_max_is_higher() {
        let book = book_with_last_chapter(10);
        let fetched = vec![chapter(11), chapter(12)];
        let result = reconcile(&book, &fetched);
        assert_eq!(result.book.last_chapter_number, 12);
        assert_eq!(result.book.last_chapter_title, Some("Chapter 12".to_string()));
        assert!(result.advanced);
    }

    #[test]
    fn never_decreases_on_fewer_fetched_pages() {
        let book = book_with_last_chapter(100);
        let fetched = vec![chapter(78), chapter(79), chapter(80)];
        let result = reconcile(&book, &fetched);
        assert_eq!(result.book.last_chapter_number, 100);
        assert!(!result.advanced);
    }

    #[test]
    fn empty_fetch_leaves_book_unchanged() {
        let book = book_with_last_chapter(5);
        let result = reconcile(&book, &[]);
        assert_eq!(result.book.last_chapter_number, 5);
        assert!(result.chapters_to_upsert.is_empty());
        assert!(!result.advanced);
    }

    proptest! {
        /// Reconciliation is monotonic: for any sequence of fetches,
        /// `book.last_chapter_number` is non-decreasing over time. Feeds an
        /// arbitrary sequence of fetched-chapter-number sets through
        /// `reconcile`, threading the output book back in as the next
        /// call's input, and checks the number never drops.
        #[test]
        fn last_chapter_number_never_decreases_across_a_fetch_sequence(
            fetches in proptest::collection::vec(
                proptest::collection::vec(1i64..500, 0..20),
                1..20,
            )
        ) {
            let mut book = book_with_last_chapter(0);
            let mut previous = book.last_chapter_number;
            for numbers in fetches {
                let fetched: Vec<Chapter> = numbers.into_iter().map(chapter).collect();
                let result = reconcile(&book, &fetched);
                prop_assert!(result.book.last_chapter_number >= previous);
                previous = result.book.last_chapter_number;
                book = result.book;
            }
        }
    }
}
