//! Business logic services

pub mod cache;
pub mod catalog;
pub mod email;
pub mod listing;
pub mod loans;
pub mod overdue;
pub mod redis;
pub mod tasks;

use std::sync::Arc;

use crate::{config::AppConfig, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub loans: loans::LoansService,
    pub listing: listing::ListingService,
}

impl Services {
    /// Wire the services over a repository, cache and task queue
    pub fn new(
        repository: Repository,
        cache: Arc<dyn cache::CacheStore>,
        queue: Arc<dyn tasks::TaskQueue>,
        config: &AppConfig,
    ) -> Self {
        Self {
            catalog: catalog::CatalogService::new(repository.clone()),
            loans: loans::LoansService::new(repository.clone(), queue, config.loans.clone()),
            listing: listing::ListingService::new(repository.catalog, cache, config.listing.clone()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{Days, NaiveDate};

    use crate::{
        models::{
            author::CreateAuthor, book::CreateBook, member::CreateMember, Book, Loan, Member, NewLoan,
        },
        repository::Repository,
    };

    /// In-memory repository with one author, one book and one member
    pub struct Fixture {
        pub repository: Repository,
        pub book: Book,
        pub member: Member,
    }

    impl Fixture {
        pub async fn new(copies: i32) -> Self {
            let repository = Repository::in_memory();
            let author = repository
                .catalog
                .create_author(&CreateAuthor {
                    first_name: "Octavia".into(),
                    last_name: "Butler".into(),
                    biography: None,
                })
                .await
                .unwrap();
            let book = repository
                .catalog
                .create_book(&CreateBook {
                    title: "Kindred".into(),
                    author_id: author.id,
                    isbn: None,
                    published_date: None,
                    total_copies: copies,
                })
                .await
                .unwrap();
            let member = repository
                .catalog
                .create_member(&CreateMember {
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    email: "ada@example.org".into(),
                    phone: None,
                    membership_date: None,
                })
                .await
                .unwrap();
            Self {
                repository,
                book,
                member,
            }
        }

        pub async fn add_member(&self, email: &str) -> Member {
            self.repository
                .catalog
                .create_member(&CreateMember {
                    first_name: "Reader".into(),
                    last_name: email.into(),
                    email: email.into(),
                    phone: None,
                    membership_date: None,
                })
                .await
                .unwrap()
        }

        /// Lend a copy to the fixture member today
        pub async fn lend(&self) -> Loan {
            self.lend_on(super::loans::today()).await
        }

        /// Lend a copy to the fixture member with a backdated loan date
        pub async fn lend_on(&self, loan_date: NaiveDate) -> Loan {
            let mut unit = self.repository.loans.begin().await.unwrap();
            let book = unit.lock_book(self.book.id).await.unwrap().unwrap();
            unit.set_available_copies(book.id, book.available_copies - 1)
                .await
                .unwrap();
            let loan = unit.insert_loan(&self.new_loan(loan_date)).await.unwrap();
            unit.commit().await.unwrap();
            loan
        }

        /// Record a loan without touching the available count
        pub async fn insert_loan_only(&self, loan_date: NaiveDate) -> Loan {
            let mut unit = self.repository.loans.begin().await.unwrap();
            unit.lock_book(self.book.id).await.unwrap();
            let loan = unit.insert_loan(&self.new_loan(loan_date)).await.unwrap();
            unit.commit().await.unwrap();
            loan
        }

        fn new_loan(&self, loan_date: NaiveDate) -> NewLoan {
            NewLoan {
                book_id: self.book.id,
                member_id: self.member.id,
                loan_date,
                due_date: loan_date + Days::new(14),
            }
        }
    }
}
