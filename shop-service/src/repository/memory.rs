//! In-process store behind the same traits as [`PgStore`](super::PgStore).
//!
//! All tables live behind one mutex; a workflow holds the guard from its
//! first read to its last write, so a failed checkout leaves nothing behind.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use shared::catalog::{ProductFilter, ProductSort};
use shared::inventory::{adjust_stock, ensure_orderable, restore_stock, StockLedger};
use shared::order::{order_total, plan_transition, validate_shipping_address, CheckoutRequest};
use shared::{OrderStatus, Page, Principal, ShopError};
use tokio::sync::Mutex;

use super::{CatalogRepository, OrderRepository, ReviewRepository, UserRepository};
use crate::error::AppResult;
use crate::models::*;

#[derive(Debug, Default)]
struct Sequences {
    users: i32,
    categories: i32,
    products: i32,
    orders: i32,
    order_items: i32,
    reviews: i32,
}

fn next(seq: &mut i32) -> i32 {
    *seq += 1;
    *seq
}

#[derive(Debug, Default)]
struct Tables {
    seq: Sequences,
    users: BTreeMap<i32, User>,
    categories: BTreeMap<i32, Category>,
    products: BTreeMap<i32, Product>,
    orders: BTreeMap<i32, Order>,
    order_items: BTreeMap<i32, OrderItem>,
    reviews: BTreeMap<i32, Review>,
}

impl Tables {
    fn items_of(&self, order_id: i32) -> Vec<OrderItem> {
        self.order_items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> (chrono::DateTime<Utc>, i32),
{
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn create_category(&self, new: NewCategory) -> AppResult<Category> {
        let mut t = self.tables.lock().await;
        if t.categories.values().any(|c| c.slug == new.slug) {
            return Err(ShopError::conflict(format!("category slug '{}' already exists", new.slug)).into());
        }
        if let Some(parent) = new.parent_id {
            if !t.categories.contains_key(&parent) {
                return Err(ShopError::conflict("parent category does not exist").into());
            }
        }
        let now = Utc::now();
        let category = Category {
            id: next(&mut t.seq.categories),
            name: new.name,
            slug: new.slug,
            parent_id: new.parent_id,
            created_at: now,
            updated_at: now,
        };
        t.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn get_category(&self, id: i32) -> AppResult<Option<Category>> {
        Ok(self.tables.lock().await.categories.get(&id).cloned())
    }

    async fn get_category_by_slug(&self, slug: &str) -> AppResult<Option<Category>> {
        let t = self.tables.lock().await;
        Ok(t.categories.values().find(|c| c.slug == slug).cloned())
    }

    async fn list_categories(&self, page: Page) -> AppResult<Vec<Category>> {
        let t = self.tables.lock().await;
        Ok(page.apply(t.categories.values().cloned().collect()))
    }

    async fn update_category(&self, id: i32, changes: CategoryChanges) -> AppResult<Option<Category>> {
        let mut t = self.tables.lock().await;
        if let Some(slug) = &changes.slug {
            if t.categories.values().any(|c| c.id != id && &c.slug == slug) {
                return Err(ShopError::conflict(format!("category slug '{slug}' already exists")).into());
            }
        }
        if let Some(Some(parent)) = changes.parent_id {
            if parent == id || !t.categories.contains_key(&parent) {
                return Err(ShopError::conflict("invalid parent category").into());
            }
        }
        let Some(category) = t.categories.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            category.name = name;
        }
        if let Some(slug) = changes.slug {
            category.slug = slug;
        }
        if let Some(parent_id) = changes.parent_id {
            category.parent_id = parent_id;
        }
        category.updated_at = changes.updated_at.unwrap_or_else(Utc::now);
        Ok(Some(category.clone()))
    }

    async fn delete_category(&self, id: i32) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        if !t.categories.contains_key(&id) {
            return Ok(false);
        }
        if t.products.values().any(|p| p.category_id == id) {
            return Err(ShopError::conflict("category still has products").into());
        }
        t.categories.remove(&id);
        for child in t.categories.values_mut().filter(|c| c.parent_id == Some(id)) {
            child.parent_id = None;
        }
        Ok(true)
    }

    async fn category_product_counts(&self) -> AppResult<Vec<CategoryProductCount>> {
        let t = self.tables.lock().await;
        Ok(t.categories
            .values()
            .map(|c| CategoryProductCount {
                category_id: c.id,
                name: c.name.clone(),
                slug: c.slug.clone(),
                product_count: t
                    .products
                    .values()
                    .filter(|p| p.category_id == c.id && p.is_active)
                    .count() as i64,
            })
            .collect())
    }

    async fn create_product(&self, new: NewProduct) -> AppResult<Product> {
        let mut t = self.tables.lock().await;
        if t.products.values().any(|p| p.slug == new.slug) {
            return Err(ShopError::conflict(format!("product slug '{}' already exists", new.slug)).into());
        }
        if !t.categories.contains_key(&new.category_id) {
            return Err(ShopError::conflict("category does not exist").into());
        }
        let now = Utc::now();
        let product = Product {
            id: next(&mut t.seq.products),
            name: new.name,
            slug: new.slug,
            description: new.description,
            price: new.price,
            stock: new.stock,
            is_active: new.is_active,
            image: new.image,
            category_id: new.category_id,
            created_at: now,
            updated_at: now,
        };
        t.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: i32) -> AppResult<Option<Product>> {
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn get_product_by_slug(&self, slug: &str) -> AppResult<Option<Product>> {
        let t = self.tables.lock().await;
        Ok(t.products.values().find(|p| p.slug == slug).cloned())
    }

    async fn get_products(&self, ids: &[i32]) -> AppResult<Vec<Product>> {
        let t = self.tables.lock().await;
        Ok(ids.iter().filter_map(|id| t.products.get(id).cloned()).collect())
    }

    async fn search_products(&self, filter: &ProductFilter, page: Page) -> AppResult<Vec<Product>> {
        let t = self.tables.lock().await;
        let mut found: Vec<Product> = t
            .products
            .values()
            .filter(|p| {
                filter.matches(&p.name, p.description.as_deref(), &p.price, p.category_id, p.is_active)
            })
            .cloned()
            .collect();
        match filter.sort {
            ProductSort::PriceAsc => found.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id))),
            ProductSort::PriceDesc => found.sort_by(|a, b| b.price.cmp(&a.price).then(a.id.cmp(&b.id))),
            ProductSort::Newest => newest_first(&mut found, |p| (p.created_at, p.id)),
            ProductSort::Oldest => found.sort_by_key(|p| (p.created_at, p.id)),
            ProductSort::NameAsc => found.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
            ProductSort::NameDesc => found.sort_by(|a, b| b.name.cmp(&a.name).then(a.id.cmp(&b.id))),
        }
        Ok(page.apply(found))
    }

    async fn low_stock_products(&self, threshold: i32, page: Page) -> AppResult<Vec<Product>> {
        let t = self.tables.lock().await;
        let mut found: Vec<Product> = t
            .products
            .values()
            .filter(|p| p.is_active && p.stock <= threshold)
            .cloned()
            .collect();
        found.sort_by_key(|p| (p.stock, p.id));
        Ok(page.apply(found))
    }

    async fn update_product(&self, id: i32, changes: ProductChanges) -> AppResult<Option<Product>> {
        let mut t = self.tables.lock().await;
        if let Some(slug) = &changes.slug {
            if t.products.values().any(|p| p.id != id && &p.slug == slug) {
                return Err(ShopError::conflict(format!("product slug '{slug}' already exists")).into());
            }
        }
        if let Some(category_id) = changes.category_id {
            if !t.categories.contains_key(&category_id) {
                return Err(ShopError::conflict("category does not exist").into());
            }
        }
        let Some(product) = t.products.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            product.name = name;
        }
        if let Some(slug) = changes.slug {
            product.slug = slug;
        }
        if let Some(description) = changes.description {
            product.description = description;
        }
        if let Some(price) = changes.price {
            product.price = price;
        }
        if let Some(stock) = changes.stock {
            product.stock = stock;
        }
        if let Some(is_active) = changes.is_active {
            product.is_active = is_active;
        }
        if let Some(image) = changes.image {
            product.image = image;
        }
        if let Some(category_id) = changes.category_id {
            product.category_id = category_id;
        }
        product.updated_at = changes.updated_at.unwrap_or_else(Utc::now);
        Ok(Some(product.clone()))
    }

    async fn delete_product(&self, id: i32) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        if !t.products.contains_key(&id) {
            return Ok(false);
        }
        if t.order_items.values().any(|item| item.product_id == id) {
            return Err(ShopError::conflict("product is referenced by orders").into());
        }
        t.products.remove(&id);
        t.reviews.retain(|_, r| r.product_id != id);
        Ok(true)
    }

    async fn adjust_stock(&self, id: i32, change: i32) -> AppResult<Product> {
        let mut t = self.tables.lock().await;
        let product = t
            .products
            .get_mut(&id)
            .ok_or_else(|| ShopError::not_found("product", id))?;
        product.stock = adjust_stock(product.stock, change)?;
        product.updated_at = Utc::now();
        Ok(product.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, new: NewUser) -> AppResult<User> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|u| u.username == new.username || u.email == new.email) {
            return Err(ShopError::conflict("username or email already registered").into());
        }
        let now = Utc::now();
        let user = User {
            id: next(&mut t.seq.users),
            username: new.username,
            email: new.email,
            hashed_password: new.hashed_password,
            is_active: new.is_active,
            is_superuser: new.is_superuser,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i32) -> AppResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users.values().find(|u| u.username == username).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self, only_active: bool, page: Page) -> AppResult<Vec<User>> {
        let t = self.tables.lock().await;
        let users = t
            .users
            .values()
            .filter(|u| !only_active || u.is_active)
            .cloned()
            .collect();
        Ok(page.apply(users))
    }

    async fn update_user(&self, id: i32, changes: UserChanges) -> AppResult<Option<User>> {
        let mut t = self.tables.lock().await;
        let clash = t.users.values().any(|u| {
            u.id != id
                && (changes.username.as_ref() == Some(&u.username)
                    || changes.email.as_ref() == Some(&u.email))
        });
        if clash {
            return Err(ShopError::conflict("username or email already registered").into());
        }
        let Some(user) = t.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(hashed_password) = changes.hashed_password {
            user.hashed_password = hashed_password;
        }
        if let Some(is_active) = changes.is_active {
            user.is_active = is_active;
        }
        if let Some(is_superuser) = changes.is_superuser {
            user.is_superuser = is_superuser;
        }
        user.updated_at = changes.updated_at.unwrap_or_else(Utc::now);
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: i32) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        if !t.users.contains_key(&id) {
            return Ok(false);
        }
        if t.orders.values().any(|o| o.user_id == id) {
            return Err(ShopError::conflict("user has orders").into());
        }
        t.users.remove(&id);
        t.reviews.retain(|_, r| r.user_id != id);
        Ok(true)
    }
}

#[async_trait]
impl ReviewRepository for MemoryStore {
    async fn create_review(&self, new: NewReview) -> AppResult<Review> {
        let mut t = self.tables.lock().await;
        if !t.products.contains_key(&new.product_id) {
            return Err(ShopError::not_found("product", new.product_id).into());
        }
        if t
            .reviews
            .values()
            .any(|r| r.user_id == new.user_id && r.product_id == new.product_id)
        {
            return Err(ShopError::DuplicateReview.into());
        }
        let now = Utc::now();
        let review = Review {
            id: next(&mut t.seq.reviews),
            product_id: new.product_id,
            user_id: new.user_id,
            rating: new.rating,
            comment: new.comment,
            created_at: now,
            updated_at: now,
        };
        t.reviews.insert(review.id, review.clone());
        Ok(review)
    }

    async fn get_review(&self, id: i32) -> AppResult<Option<Review>> {
        Ok(self.tables.lock().await.reviews.get(&id).cloned())
    }

    async fn list_product_reviews(&self, product_id: i32, page: Page) -> AppResult<Vec<Review>> {
        let t = self.tables.lock().await;
        let mut reviews: Vec<Review> = t
            .reviews
            .values()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect();
        newest_first(&mut reviews, |r| (r.created_at, r.id));
        Ok(page.apply(reviews))
    }

    async fn list_user_reviews(&self, user_id: i32, page: Page) -> AppResult<Vec<Review>> {
        let t = self.tables.lock().await;
        let mut reviews: Vec<Review> = t
            .reviews
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut reviews, |r| (r.created_at, r.id));
        Ok(page.apply(reviews))
    }

    async fn update_review(&self, id: i32, changes: ReviewChanges) -> AppResult<Option<Review>> {
        let mut t = self.tables.lock().await;
        let Some(review) = t.reviews.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(rating) = changes.rating {
            review.rating = rating;
        }
        if let Some(comment) = changes.comment {
            review.comment = comment;
        }
        review.updated_at = changes.updated_at.unwrap_or_else(Utc::now);
        Ok(Some(review.clone()))
    }

    async fn delete_review(&self, id: i32) -> AppResult<bool> {
        Ok(self.tables.lock().await.reviews.remove(&id).is_some())
    }

    async fn rating_counts(&self, product_id: i32) -> AppResult<Vec<(i32, i64)>> {
        let t = self.tables.lock().await;
        let mut counts: BTreeMap<i32, i64> = BTreeMap::new();
        for review in t.reviews.values().filter(|r| r.product_id == product_id) {
            *counts.entry(review.rating).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn count_user_reviews(&self, user_id: i32) -> AppResult<i64> {
        let t = self.tables.lock().await;
        Ok(t.reviews.values().filter(|r| r.user_id == user_id).count() as i64)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn checkout(&self, request: CheckoutRequest) -> AppResult<OrderWithItems> {
        request.validate()?;
        let mut t = self.tables.lock().await;

        // Validate every line before touching anything.
        let mut ledger = StockLedger::new();
        let mut priced = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let snapshot = t.products.get(&line.product_id).map(Product::snapshot);
            let product = ensure_orderable(line.product_id, snapshot.as_ref(), line.quantity)?;
            ledger.claim(product, line.quantity)?;
            let price = line.unit_price.clone().unwrap_or_else(|| product.price.clone());
            priced.push((line.product_id, line.quantity, price));
        }
        let total_price = order_total(priced.iter().map(|(_, quantity, price)| (price, *quantity)));

        let now = Utc::now();
        for (product_id, claimed) in ledger.claims() {
            if let Some(product) = t.products.get_mut(&product_id) {
                product.stock -= claimed;
                product.updated_at = now;
            }
        }

        let order = Order {
            id: next(&mut t.seq.orders),
            user_id: request.user_id,
            status: OrderStatus::Pending,
            total_price,
            shipping_address: request.shipping_address,
            created_at: now,
            updated_at: now,
        };
        t.orders.insert(order.id, order.clone());

        let mut items = Vec::with_capacity(priced.len());
        for (product_id, quantity, price) in priced {
            let item = OrderItem {
                id: next(&mut t.seq.order_items),
                order_id: order.id,
                product_id,
                quantity,
                price,
            };
            t.order_items.insert(item.id, item.clone());
            items.push(item);
        }

        tracing::info!(order_id = order.id, user_id = order.user_id, items = items.len(), "order placed");
        Ok(OrderWithItems { order, items })
    }

    async fn transition_order(
        &self,
        actor: &Principal,
        order_id: i32,
        to: OrderStatus,
    ) -> AppResult<Order> {
        let mut t = self.tables.lock().await;
        let order = t
            .orders
            .get(&order_id)
            .ok_or_else(|| ShopError::not_found("order", order_id))?;
        let plan = plan_transition(actor, order.user_id, order.status, to)?;

        if plan.restores_stock {
            let mut restored = Vec::new();
            for item in t.items_of(order_id) {
                let current = t.products.get(&item.product_id).map_or(0, |p| p.stock);
                let stock = restore_stock(current, item.quantity)?;
                restored.push((item.product_id, stock));
            }
            let now = Utc::now();
            for (product_id, stock) in restored {
                if let Some(product) = t.products.get_mut(&product_id) {
                    product.stock = stock;
                    product.updated_at = now;
                }
            }
        }

        let order = t
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ShopError::not_found("order", order_id))?;
        order.status = plan.to;
        order.updated_at = Utc::now();
        tracing::info!(
            order_id,
            from = %plan.from,
            to = %plan.to,
            restored = plan.restores_stock,
            "order status changed"
        );
        Ok(order.clone())
    }

    async fn update_shipping_address(
        &self,
        actor: &Principal,
        order_id: i32,
        address: String,
    ) -> AppResult<Order> {
        validate_shipping_address(&address)?;
        let mut t = self.tables.lock().await;
        let order = t
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ShopError::not_found("order", order_id))?;
        if order.user_id != actor.id {
            return Err(ShopError::forbidden("only the owner can change the shipping address").into());
        }
        if order.status != OrderStatus::Pending {
            return Err(ShopError::validation("shipping address can only be changed while pending").into());
        }
        order.shipping_address = address;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn get_order(&self, id: i32) -> AppResult<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn get_order_items(&self, order_id: i32) -> AppResult<Vec<OrderItem>> {
        Ok(self.tables.lock().await.items_of(order_id))
    }

    async fn list_user_orders(
        &self,
        user_id: i32,
        status: Option<OrderStatus>,
        page: Page,
    ) -> AppResult<Vec<Order>> {
        let t = self.tables.lock().await;
        let mut orders: Vec<Order> = t
            .orders
            .values()
            .filter(|o| o.user_id == user_id && status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        newest_first(&mut orders, |o| (o.created_at, o.id));
        Ok(page.apply(orders))
    }

    async fn list_orders_by_status(&self, status: OrderStatus, page: Page) -> AppResult<Vec<Order>> {
        let t = self.tables.lock().await;
        let mut orders: Vec<Order> = t
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        newest_first(&mut orders, |o| (o.created_at, o.id));
        Ok(page.apply(orders))
    }

    async fn delete_order(&self, id: i32) -> AppResult<bool> {
        let mut t = self.tables.lock().await;
        if t.orders.remove(&id).is_none() {
            return Ok(false);
        }
        t.order_items.retain(|_, item| item.order_id != id);
        Ok(true)
    }

    async fn order_status_counts(&self, user_id: i32) -> AppResult<Vec<(OrderStatus, i64)>> {
        let t = self.tables.lock().await;
        let mut counts: BTreeMap<OrderStatus, i64> = BTreeMap::new();
        for order in t.orders.values().filter(|o| o.user_id == user_id) {
            *counts.entry(order.status).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn paid_total(&self, user_id: i32) -> AppResult<Option<BigDecimal>> {
        let t = self.tables.lock().await;
        let paid: Vec<&BigDecimal> = t
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.status == OrderStatus::Paid)
            .map(|o| &o.total_price)
            .collect();
        if paid.is_empty() {
            return Ok(None);
        }
        Ok(Some(paid.into_iter().fold(BigDecimal::from(0), |acc, price| acc + price)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::AppError;
    use shared::order::CheckoutLine;

    struct Fixture {
        store: MemoryStore,
        alice: Principal,
        bob: Principal,
        admin: Principal,
    }

    async fn user(store: &MemoryStore, name: &str, superuser: bool) -> Principal {
        store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                hashed_password: "x".to_string(),
                is_active: true,
                is_superuser: superuser,
            })
            .await
            .unwrap()
            .principal()
    }

    async fn product(store: &MemoryStore, name: &str, price: &str, stock: i32) -> Product {
        store
            .create_product(NewProduct {
                name: name.to_string(),
                slug: name.to_lowercase(),
                description: None,
                price: price.parse().unwrap(),
                stock,
                is_active: true,
                image: None,
                category_id: 1,
            })
            .await
            .unwrap()
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        store
            .create_category(NewCategory {
                name: "Books".to_string(),
                slug: "books".to_string(),
                parent_id: None,
            })
            .await
            .unwrap();
        let alice = user(&store, "alice", false).await;
        let bob = user(&store, "bob", false).await;
        let admin = user(&store, "root", true).await;
        Fixture { store, alice, bob, admin }
    }

    fn line(product_id: i32, quantity: i32) -> CheckoutLine {
        CheckoutLine {
            product_id,
            quantity,
            unit_price: None,
        }
    }

    fn request(user_id: i32, lines: Vec<CheckoutLine>) -> CheckoutRequest {
        CheckoutRequest {
            user_id,
            shipping_address: "12 Long Street, Springfield".to_string(),
            lines,
        }
    }

    async fn stock_of(store: &MemoryStore, id: i32) -> i32 {
        store.get_product(id).await.unwrap().unwrap().stock
    }

    #[tokio::test]
    async fn empty_checkout_is_rejected() {
        let f = fixture().await;
        let err = f.store.checkout(request(f.alice.id, vec![])).await.unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::EmptyCart)));
    }

    #[tokio::test]
    async fn failed_line_leaves_all_stock_untouched() {
        let f = fixture().await;
        let a = product(&f.store, "A", "10.00", 5).await;
        let b = product(&f.store, "B", "3.00", 1).await;

        let err = f
            .store
            .checkout(request(f.alice.id, vec![line(a.id, 2), line(b.id, 2)]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Shop(ShopError::InsufficientStock { available: 1, requested: 2, .. })
        ));
        assert_eq!(stock_of(&f.store, a.id).await, 5);
        assert_eq!(stock_of(&f.store, b.id).await, 1);
        assert!(f
            .store
            .list_user_orders(f.alice.id, None, Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn duplicate_lines_are_checked_cumulatively() {
        let f = fixture().await;
        let a = product(&f.store, "A", "1.00", 3).await;

        let err = f
            .store
            .checkout(request(f.alice.id, vec![line(a.id, 2), line(a.id, 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::InsufficientStock { .. })));
        assert_eq!(stock_of(&f.store, a.id).await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checkouts_sell_the_last_unit_once() {
        let f = fixture().await;
        let a = product(&f.store, "A", "7.00", 1).await;
        let (buyer, id) = (f.alice.id, a.id);
        let store = Arc::new(f.store);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.checkout(request(buyer, vec![line(id, 1)])).await })
            })
            .collect();

        let mut placed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => placed += 1,
                Err(err) => assert!(matches!(err, AppError::Shop(ShopError::InsufficientStock { .. }))),
            }
        }

        assert_eq!(placed, 1);
        assert_eq!(stock_of(&store, id).await, 0);
        let orders = store.list_user_orders(buyer, None, Page::default()).await.unwrap();
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn stock_follows_checkout_cancel_checkout() {
        let f = fixture().await;
        let a = product(&f.store, "A", "4.00", 5).await;

        let first = f
            .store
            .checkout(request(f.alice.id, vec![line(a.id, 5)]))
            .await
            .unwrap();
        assert_eq!(stock_of(&f.store, a.id).await, 0);

        let err = f
            .store
            .checkout(request(f.bob.id, vec![line(a.id, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::InsufficientStock { .. })));
        assert_eq!(stock_of(&f.store, a.id).await, 0);

        f.store
            .transition_order(&f.alice, first.order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(stock_of(&f.store, a.id).await, 5);

        let second = f
            .store
            .checkout(request(f.bob.id, vec![line(a.id, 4)]))
            .await
            .unwrap();
        assert_eq!(second.order.total_price, "16.00".parse::<BigDecimal>().unwrap());
        assert_eq!(stock_of(&f.store, a.id).await, 1);
    }

    #[tokio::test]
    async fn paid_total_sums_only_paid_orders() {
        let f = fixture().await;
        let a = product(&f.store, "A", "2.50", 10).await;
        assert_eq!(f.store.paid_total(f.alice.id).await.unwrap(), None);

        let paid = f
            .store
            .checkout(request(f.alice.id, vec![line(a.id, 2)]))
            .await
            .unwrap();
        f.store
            .checkout(request(f.alice.id, vec![line(a.id, 1)]))
            .await
            .unwrap();
        f.store
            .transition_order(&f.admin, paid.order.id, OrderStatus::Paid)
            .await
            .unwrap();

        assert_eq!(
            f.store.paid_total(f.alice.id).await.unwrap(),
            Some("5.00".parse::<BigDecimal>().unwrap())
        );
    }

    #[tokio::test]
    async fn checkout_totals_exactly_and_decrements_stock() {
        let f = fixture().await;
        let a = product(&f.store, "A", "19.99", 10).await;
        let b = product(&f.store, "B", "0.10", 10).await;

        let placed = f
            .store
            .checkout(request(f.alice.id, vec![line(a.id, 3), line(b.id, 3)]))
            .await
            .unwrap();

        assert_eq!(placed.order.status, OrderStatus::Pending);
        assert_eq!(placed.order.total_price, "60.27".parse::<BigDecimal>().unwrap());
        assert_eq!(placed.items.len(), 2);
        assert_eq!(stock_of(&f.store, a.id).await, 7);
        assert_eq!(stock_of(&f.store, b.id).await, 7);
    }

    #[tokio::test]
    async fn snapshot_price_wins_over_live_price() {
        let f = fixture().await;
        let a = product(&f.store, "A", "5.00", 10).await;
        let lines = vec![CheckoutLine {
            product_id: a.id,
            quantity: 2,
            unit_price: Some("4.50".parse().unwrap()),
        }];

        let placed = f.store.checkout(request(f.alice.id, lines)).await.unwrap();
        assert_eq!(placed.items[0].price, "4.50".parse::<BigDecimal>().unwrap());
        assert_eq!(placed.order.total_price, "9.00".parse::<BigDecimal>().unwrap());
    }

    #[tokio::test]
    async fn inactive_product_cannot_be_ordered() {
        let f = fixture().await;
        let a = product(&f.store, "A", "5.00", 10).await;
        f.store
            .update_product(
                a.id,
                ProductChanges {
                    is_active: Some(false),
                    ..ProductChanges::default()
                },
            )
            .await
            .unwrap();

        let err = f
            .store
            .checkout(request(f.alice.id, vec![line(a.id, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::Unavailable(_))));
    }

    #[tokio::test]
    async fn cancelling_pending_order_restores_stock() {
        let f = fixture().await;
        let a = product(&f.store, "A", "2.00", 10).await;
        let placed = f
            .store
            .checkout(request(f.alice.id, vec![line(a.id, 3)]))
            .await
            .unwrap();
        assert_eq!(stock_of(&f.store, a.id).await, 7);

        let cancelled = f
            .store
            .transition_order(&f.alice, placed.order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(stock_of(&f.store, a.id).await, 10);

        // Cancelled is terminal, even for administrators.
        let err = f
            .store
            .transition_order(&f.admin, placed.order.id, OrderStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::InvalidTransition { .. })));
        assert_eq!(stock_of(&f.store, a.id).await, 10);
    }

    #[tokio::test]
    async fn cancelling_paid_order_keeps_stock() {
        let f = fixture().await;
        let a = product(&f.store, "A", "2.00", 10).await;
        let placed = f
            .store
            .checkout(request(f.alice.id, vec![line(a.id, 3)]))
            .await
            .unwrap();
        let id = placed.order.id;

        f.store.transition_order(&f.admin, id, OrderStatus::Paid).await.unwrap();
        let err = f
            .store
            .transition_order(&f.alice, id, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::InvalidTransition { .. })));

        f.store.transition_order(&f.admin, id, OrderStatus::Cancelled).await.unwrap();
        assert_eq!(stock_of(&f.store, a.id).await, 7);
    }

    #[tokio::test]
    async fn other_customers_cannot_touch_an_order() {
        let f = fixture().await;
        let a = product(&f.store, "A", "2.00", 10).await;
        let placed = f
            .store
            .checkout(request(f.alice.id, vec![line(a.id, 1)]))
            .await
            .unwrap();

        let err = f
            .store
            .transition_order(&f.bob, placed.order.id, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::Forbidden(_))));

        let err = f
            .store
            .update_shipping_address(&f.bob, placed.order.id, "99 Other Road, Shelbyville".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::Forbidden(_))));
        assert_eq!(stock_of(&f.store, a.id).await, 9);
    }

    #[tokio::test]
    async fn second_review_of_a_product_is_rejected() {
        let f = fixture().await;
        let a = product(&f.store, "A", "2.00", 10).await;
        let review = |rating| NewReview {
            product_id: a.id,
            user_id: f.alice.id,
            rating,
            comment: None,
        };

        f.store.create_review(review(5)).await.unwrap();
        let err = f.store.create_review(review(3)).await.unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::DuplicateReview)));
        assert_eq!(f.store.rating_counts(a.id).await.unwrap(), vec![(5, 1)]);
    }

    #[tokio::test]
    async fn stock_adjustment_cannot_go_negative() {
        let f = fixture().await;
        let a = product(&f.store, "A", "2.00", 2).await;

        assert_eq!(f.store.adjust_stock(a.id, 3).await.unwrap().stock, 5);
        let err = f.store.adjust_stock(a.id, -6).await.unwrap_err();
        assert!(matches!(err, AppError::Shop(ShopError::Validation(_))));
        assert_eq!(stock_of(&f.store, a.id).await, 5);
    }
}
