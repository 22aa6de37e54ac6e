//! Catalog management service

use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        author::{CreateAuthor, UpdateAuthor},
        book::{CreateBook, UpdateBook},
        member::{CreateMember, UpdateMember},
        Author, Book, Member, Paging,
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Check the backing store is reachable
    pub async fn ping(&self) -> AppResult<()> {
        self.repository.catalog.ping().await
    }

    // Authors

    pub async fn list_authors(&self, paging: Paging) -> AppResult<(Vec<Author>, i64)> {
        self.repository.catalog.list_authors(paging).await
    }

    pub async fn get_author(&self, id: i32) -> AppResult<Author> {
        self.repository.catalog.get_author(id).await
    }

    pub async fn create_author(&self, data: CreateAuthor) -> AppResult<Author> {
        data.validate()?;
        let author = self.repository.catalog.create_author(&data).await?;
        tracing::info!(author_id = author.id, "Author created");
        Ok(author)
    }

    pub async fn update_author(&self, id: i32, data: UpdateAuthor) -> AppResult<Author> {
        data.validate()?;
        self.repository.catalog.update_author(id, &data).await
    }

    pub async fn delete_author(&self, id: i32) -> AppResult<()> {
        self.repository.catalog.delete_author(id).await?;
        tracing::info!(author_id = id, "Author deleted");
        Ok(())
    }

    // Books

    pub async fn list_books(&self, paging: Paging) -> AppResult<(Vec<Book>, i64)> {
        self.repository.catalog.list_books(paging).await
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.repository.catalog.get_book(id).await
    }

    pub async fn create_book(&self, data: CreateBook) -> AppResult<Book> {
        data.validate()?;
        let book = self.repository.catalog.create_book(&data).await?;
        tracing::info!(book_id = book.id, copies = book.total_copies, "Book created");
        Ok(book)
    }

    /// Partial update; a new `total_copies` keeps loaned copies out of the available count
    pub async fn update_book(&self, id: i32, data: UpdateBook) -> AppResult<Book> {
        data.validate()?;
        let book = self.repository.catalog.update_book(id, &data).await?;
        if data.total_copies.is_some() {
            tracing::info!(
                book_id = id,
                total = book.total_copies,
                available = book.available_copies,
                "Book copies resized"
            );
        }
        Ok(book)
    }

    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        self.repository.catalog.delete_book(id).await?;
        tracing::info!(book_id = id, "Book deleted");
        Ok(())
    }

    // Members

    pub async fn list_members(&self, paging: Paging) -> AppResult<(Vec<Member>, i64)> {
        self.repository.catalog.list_members(paging).await
    }

    pub async fn get_member(&self, id: i32) -> AppResult<Member> {
        self.repository.catalog.get_member(id).await
    }

    pub async fn create_member(&self, data: CreateMember) -> AppResult<Member> {
        data.validate()?;
        let member = self.repository.catalog.create_member(&data).await?;
        tracing::info!(member_id = member.id, "Member created");
        Ok(member)
    }

    pub async fn update_member(&self, id: i32, data: UpdateMember) -> AppResult<Member> {
        data.validate()?;
        self.repository.catalog.update_member(id, &data).await
    }

    pub async fn delete_member(&self, id: i32) -> AppResult<()> {
        self.repository.catalog.delete_member(id).await?;
        tracing::info!(member_id = id, "Member deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::AppError, services::testing::Fixture};

    #[tokio::test]
    async fn invalid_payloads_never_reach_the_store() {
        let fixture = Fixture::new(1).await;
        let service = CatalogService::new(fixture.repository.clone());

        let err = service
            .create_member(CreateMember {
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                email: "not-an-email".into(),
                phone: None,
                membership_date: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let err = service
            .create_book(CreateBook {
                title: String::new(),
                author_id: fixture.book.author_id,
                isbn: None,
                published_date: None,
                total_copies: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let err = service
            .update_book(
                fixture.book.id,
                UpdateBook {
                    total_copies: Some(-1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let (_, members) = service.list_members(Paging::new(None, None).unwrap()).await.unwrap();
        assert_eq!(members, 1);
    }

    #[tokio::test]
    async fn new_book_has_every_copy_available() {
        let fixture = Fixture::new(1).await;
        let service = CatalogService::new(fixture.repository.clone());

        let book = service
            .create_book(CreateBook {
                title: "Parable of the Sower".into(),
                author_id: fixture.book.author_id,
                isbn: Some("9780446675505".into()),
                published_date: None,
                total_copies: 4,
            })
            .await
            .unwrap();
        assert_eq!(book.available_copies, 4);
        assert_eq!(service.get_book(book.id).await.unwrap(), book);
    }

    #[tokio::test]
    async fn partial_updates_keep_other_fields() {
        let fixture = Fixture::new(1).await;
        let service = CatalogService::new(fixture.repository.clone());

        let member = service
            .update_member(
                fixture.member.id,
                UpdateMember {
                    phone: Some("555-0100".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(member.phone.as_deref(), Some("555-0100"));
        assert_eq!(member.email, fixture.member.email);
    }
}
