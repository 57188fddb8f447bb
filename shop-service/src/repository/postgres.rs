use std::collections::HashMap;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::catalog::{ProductFilter, ProductSort};
use shared::inventory::{adjust_stock, ensure_orderable, StockLedger};
use shared::order::{order_total, plan_transition, validate_shipping_address, CheckoutRequest};
use shared::{OrderStatus, Page, Principal, ShopError};
use tracing::info;

use super::{CatalogRepository, OrderRepository, ReviewRepository, UserRepository};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> AppResult<PooledConnection<'_, AsyncPgConnection>> {
        Ok(self.pool.get().await?)
    }
}

fn into_orders(rows: Vec<OrderRow>) -> AppResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn create_category(&self, new: NewCategory) -> AppResult<Category> {
        let mut conn = self.conn().await?;
        Ok(diesel::insert_into(categories::table)
            .values(&new)
            .returning(Category::as_returning())
            .get_result(&mut *conn)
            .await?)
    }

    async fn get_category(&self, id: i32) -> AppResult<Option<Category>> {
        let mut conn = self.conn().await?;
        Ok(categories::table
            .find(id)
            .select(Category::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    async fn get_category_by_slug(&self, slug: &str) -> AppResult<Option<Category>> {
        let mut conn = self.conn().await?;
        Ok(categories::table
            .filter(categories::slug.eq(slug))
            .select(Category::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    async fn list_categories(&self, page: Page) -> AppResult<Vec<Category>> {
        let mut conn = self.conn().await?;
        Ok(categories::table
            .order(categories::id.asc())
            .offset(page.offset)
            .limit(page.limit)
            .select(Category::as_select())
            .load(&mut *conn)
            .await?)
    }

    async fn update_category(&self, id: i32, changes: CategoryChanges) -> AppResult<Option<Category>> {
        let mut conn = self.conn().await?;
        Ok(diesel::update(categories::table.find(id))
            .set(&changes)
            .returning(Category::as_returning())
            .get_result(&mut *conn)
            .await
            .optional()?)
    }

    async fn delete_category(&self, id: i32) -> AppResult<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(categories::table.find(id))
            .execute(&mut *conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn category_product_counts(&self) -> AppResult<Vec<CategoryProductCount>> {
        let mut conn = self.conn().await?;
        let counts: HashMap<i32, i64> = products::table
            .filter(products::is_active.eq(true))
            .group_by(products::category_id)
            .select((products::category_id, count_star()))
            .load::<(i32, i64)>(&mut *conn)
            .await?
            .into_iter()
            .collect();
        let all = categories::table
            .order(categories::id.asc())
            .select(Category::as_select())
            .load(&mut *conn)
            .await?;
        Ok(all
            .into_iter()
            .map(|c| CategoryProductCount {
                product_count: counts.get(&c.id).copied().unwrap_or(0),
                category_id: c.id,
                name: c.name,
                slug: c.slug,
            })
            .collect())
    }

    async fn create_product(&self, new: NewProduct) -> AppResult<Product> {
        let mut conn = self.conn().await?;
        Ok(diesel::insert_into(products::table)
            .values(&new)
            .returning(Product::as_returning())
            .get_result(&mut *conn)
            .await?)
    }

    async fn get_product(&self, id: i32) -> AppResult<Option<Product>> {
        let mut conn = self.conn().await?;
        Ok(products::table
            .find(id)
            .select(Product::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    async fn get_product_by_slug(&self, slug: &str) -> AppResult<Option<Product>> {
        let mut conn = self.conn().await?;
        Ok(products::table
            .filter(products::slug.eq(slug))
            .select(Product::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    async fn get_products(&self, ids: &[i32]) -> AppResult<Vec<Product>> {
        let mut conn = self.conn().await?;
        Ok(products::table
            .filter(products::id.eq_any(ids))
            .select(Product::as_select())
            .load(&mut *conn)
            .await?)
    }

    async fn search_products(&self, filter: &ProductFilter, page: Page) -> AppResult<Vec<Product>> {
        let mut conn = self.conn().await?;
        let mut query = products::table.select(Product::as_select()).into_boxed();

        if filter.only_active {
            query = query.filter(products::is_active.eq(true));
        }
        if let Some(pattern) = filter.like_pattern() {
            query = query.filter(
                products::name
                    .ilike(pattern.clone())
                    .or(products::description.assume_not_null().ilike(pattern)),
            );
        }
        if let Some(category_id) = filter.category_id {
            query = query.filter(products::category_id.eq(category_id));
        }
        if let Some(min) = &filter.min_price {
            query = query.filter(products::price.ge(min.clone()));
        }
        if let Some(max) = &filter.max_price {
            query = query.filter(products::price.le(max.clone()));
        }

        query = match filter.sort {
            ProductSort::PriceAsc => query.order((products::price.asc(), products::id.asc())),
            ProductSort::PriceDesc => query.order((products::price.desc(), products::id.asc())),
            ProductSort::Newest => query.order((products::created_at.desc(), products::id.desc())),
            ProductSort::Oldest => query.order((products::created_at.asc(), products::id.asc())),
            ProductSort::NameAsc => query.order((products::name.asc(), products::id.asc())),
            ProductSort::NameDesc => query.order((products::name.desc(), products::id.asc())),
        };

        Ok(query
            .offset(page.offset)
            .limit(page.limit)
            .load(&mut *conn)
            .await?)
    }

    async fn low_stock_products(&self, threshold: i32, page: Page) -> AppResult<Vec<Product>> {
        let mut conn = self.conn().await?;
        Ok(products::table
            .filter(products::is_active.eq(true))
            .filter(products::stock.le(threshold))
            .order((products::stock.asc(), products::id.asc()))
            .offset(page.offset)
            .limit(page.limit)
            .select(Product::as_select())
            .load(&mut *conn)
            .await?)
    }

    async fn update_product(&self, id: i32, changes: ProductChanges) -> AppResult<Option<Product>> {
        let mut conn = self.conn().await?;
        Ok(diesel::update(products::table.find(id))
            .set(&changes)
            .returning(Product::as_returning())
            .get_result(&mut *conn)
            .await
            .optional()?)
    }

    async fn delete_product(&self, id: i32) -> AppResult<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(products::table.find(id))
            .execute(&mut *conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn adjust_stock(&self, id: i32, change: i32) -> AppResult<Product> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let product: Product = products::table
                    .find(id)
                    .select(Product::as_select())
                    .for_update()
                    .get_result(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ShopError::not_found("product", id))?;

                let stock = adjust_stock(product.stock, change)?;
                let updated = diesel::update(products::table.find(id))
                    .set((products::stock.eq(stock), products::updated_at.eq(Utc::now())))
                    .returning(Product::as_returning())
                    .get_result(conn)
                    .await?;

                info!(product_id = id, change, stock, "stock adjusted");
                Ok(updated)
            })
        })
        .await
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, new: NewUser) -> AppResult<User> {
        let mut conn = self.conn().await?;
        Ok(diesel::insert_into(users::table)
            .values(&new)
            .returning(User::as_returning())
            .get_result(&mut *conn)
            .await?)
    }

    async fn get_user(&self, id: i32) -> AppResult<Option<User>> {
        let mut conn = self.conn().await?;
        Ok(users::table
            .find(id)
            .select(User::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let mut conn = self.conn().await?;
        Ok(users::table
            .filter(users::username.eq(username))
            .select(User::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let mut conn = self.conn().await?;
        Ok(users::table
            .filter(users::email.eq(email))
            .select(User::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    async fn list_users(&self, only_active: bool, page: Page) -> AppResult<Vec<User>> {
        let mut conn = self.conn().await?;
        let mut query = users::table.select(User::as_select()).into_boxed();
        if only_active {
            query = query.filter(users::is_active.eq(true));
        }
        Ok(query
            .order(users::id.asc())
            .offset(page.offset)
            .limit(page.limit)
            .load(&mut *conn)
            .await?)
    }

    async fn update_user(&self, id: i32, changes: UserChanges) -> AppResult<Option<User>> {
        let mut conn = self.conn().await?;
        Ok(diesel::update(users::table.find(id))
            .set(&changes)
            .returning(User::as_returning())
            .get_result(&mut *conn)
            .await
            .optional()?)
    }

    async fn delete_user(&self, id: i32) -> AppResult<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(users::table.find(id))
            .execute(&mut *conn)
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl ReviewRepository for PgStore {
    async fn create_review(&self, new: NewReview) -> AppResult<Review> {
        let mut conn = self.conn().await?;
        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                // The product row lock serialises reviews for the same product.
                products::table
                    .find(new.product_id)
                    .select(products::id)
                    .for_update()
                    .get_result::<i32>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ShopError::not_found("product", new.product_id))?;

                let existing: i64 = reviews::table
                    .filter(reviews::user_id.eq(new.user_id))
                    .filter(reviews::product_id.eq(new.product_id))
                    .count()
                    .get_result(conn)
                    .await?;
                if existing > 0 {
                    return Err(ShopError::DuplicateReview.into());
                }

                Ok(diesel::insert_into(reviews::table)
                    .values(&new)
                    .returning(Review::as_returning())
                    .get_result(conn)
                    .await?)
            })
        })
        .await
    }

    async fn get_review(&self, id: i32) -> AppResult<Option<Review>> {
        let mut conn = self.conn().await?;
        Ok(reviews::table
            .find(id)
            .select(Review::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    async fn list_product_reviews(&self, product_id: i32, page: Page) -> AppResult<Vec<Review>> {
        let mut conn = self.conn().await?;
        Ok(reviews::table
            .filter(reviews::product_id.eq(product_id))
            .order((reviews::created_at.desc(), reviews::id.desc()))
            .offset(page.offset)
            .limit(page.limit)
            .select(Review::as_select())
            .load(&mut *conn)
            .await?)
    }

    async fn list_user_reviews(&self, user_id: i32, page: Page) -> AppResult<Vec<Review>> {
        let mut conn = self.conn().await?;
        Ok(reviews::table
            .filter(reviews::user_id.eq(user_id))
            .order((reviews::created_at.desc(), reviews::id.desc()))
            .offset(page.offset)
            .limit(page.limit)
            .select(Review::as_select())
            .load(&mut *conn)
            .await?)
    }

    async fn update_review(&self, id: i32, changes: ReviewChanges) -> AppResult<Option<Review>> {
        let mut conn = self.conn().await?;
        Ok(diesel::update(reviews::table.find(id))
            .set(&changes)
            .returning(Review::as_returning())
            .get_result(&mut *conn)
            .await
            .optional()?)
    }

    async fn delete_review(&self, id: i32) -> AppResult<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(reviews::table.find(id))
            .execute(&mut *conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn rating_counts(&self, product_id: i32) -> AppResult<Vec<(i32, i64)>> {
        let mut conn = self.conn().await?;
        Ok(reviews::table
            .filter(reviews::product_id.eq(product_id))
            .group_by(reviews::rating)
            .select((reviews::rating, count_star()))
            .load::<(i32, i64)>(&mut *conn)
            .await?)
    }

    async fn count_user_reviews(&self, user_id: i32) -> AppResult<i64> {
        let mut conn = self.conn().await?;
        Ok(reviews::table
            .filter(reviews::user_id.eq(user_id))
            .count()
            .get_result(&mut *conn)
            .await?)
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn checkout(&self, request: CheckoutRequest) -> AppResult<OrderWithItems> {
        request.validate()?;
        let mut conn = self.conn().await?;

        let placed = conn
            .transaction::<_, AppError, _>(|conn| {
                Box::pin(async move {
                    let mut ids: Vec<i32> = request.lines.iter().map(|l| l.product_id).collect();
                    ids.sort_unstable();
                    ids.dedup();

                    // Lock in id order so concurrent checkouts cannot deadlock.
                    let locked: HashMap<i32, Product> = products::table
                        .filter(products::id.eq_any(&ids))
                        .order(products::id.asc())
                        .select(Product::as_select())
                        .for_update()
                        .load(conn)
                        .await?
                        .into_iter()
                        .map(|p| (p.id, p))
                        .collect();

                    let mut ledger = StockLedger::new();
                    let mut priced = Vec::with_capacity(request.lines.len());
                    for line in &request.lines {
                        let snapshot = locked.get(&line.product_id).map(Product::snapshot);
                        let product =
                            ensure_orderable(line.product_id, snapshot.as_ref(), line.quantity)?;
                        ledger.claim(product, line.quantity)?;
                        let price = line
                            .unit_price
                            .clone()
                            .unwrap_or_else(|| product.price.clone());
                        priced.push((line.product_id, line.quantity, price));
                    }

                    let now = Utc::now();
                    for (product_id, claimed) in ledger.claims() {
                        let updated = diesel::update(
                            products::table
                                .filter(products::id.eq(product_id))
                                .filter(products::stock.ge(claimed)),
                        )
                        .set((
                            products::stock.eq(products::stock - claimed),
                            products::updated_at.eq(now),
                        ))
                        .execute(conn)
                        .await?;

                        if updated == 0 {
                            let product = &locked[&product_id];
                            return Err(ShopError::InsufficientStock {
                                product: product.name.clone(),
                                available: product.stock,
                                requested: claimed,
                            }
                            .into());
                        }
                    }

                    let total_price =
                        order_total(priced.iter().map(|(_, quantity, price)| (price, *quantity)));
                    let order: OrderRow = diesel::insert_into(orders::table)
                        .values(&NewOrder {
                            user_id: request.user_id,
                            status: OrderStatus::Pending.as_str().to_string(),
                            total_price,
                            shipping_address: request.shipping_address.clone(),
                        })
                        .returning(OrderRow::as_returning())
                        .get_result(conn)
                        .await?;

                    let new_items: Vec<NewOrderItem> = priced
                        .into_iter()
                        .map(|(product_id, quantity, price)| NewOrderItem {
                            order_id: order.id,
                            product_id,
                            quantity,
                            price,
                        })
                        .collect();
                    let items = diesel::insert_into(order_items::table)
                        .values(&new_items)
                        .returning(OrderItem::as_returning())
                        .get_results(conn)
                        .await?;

                    Ok(OrderWithItems {
                        order: Order::try_from(order)?,
                        items,
                    })
                })
            })
            .await?;

        info!(
            order_id = placed.order.id,
            user_id = placed.order.user_id,
            items = placed.items.len(),
            "order placed"
        );
        Ok(placed)
    }

    async fn transition_order(
        &self,
        actor: &Principal,
        order_id: i32,
        to: OrderStatus,
    ) -> AppResult<Order> {
        let actor = actor.clone();
        let mut conn = self.conn().await?;

        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let row: OrderRow = orders::table
                    .find(order_id)
                    .select(OrderRow::as_select())
                    .for_update()
                    .get_result(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ShopError::not_found("order", order_id))?;
                let current = Order::try_from(row)?;
                let plan = plan_transition(&actor, current.user_id, current.status, to)?;

                if plan.restores_stock {
                    let mut items: Vec<OrderItem> = order_items::table
                        .filter(order_items::order_id.eq(order_id))
                        .select(OrderItem::as_select())
                        .load(conn)
                        .await?;
                    items.sort_by_key(|item| item.product_id);

                    let now = Utc::now();
                    for item in &items {
                        diesel::update(products::table.find(item.product_id))
                            .set((
                                products::stock.eq(products::stock + item.quantity),
                                products::updated_at.eq(now),
                            ))
                            .execute(conn)
                            .await?;
                    }
                }

                let updated = diesel::update(orders::table.find(order_id))
                    .set((
                        orders::status.eq(plan.to.as_str()),
                        orders::updated_at.eq(Utc::now()),
                    ))
                    .returning(OrderRow::as_returning())
                    .get_result(conn)
                    .await?;

                info!(
                    order_id,
                    from = %plan.from,
                    to = %plan.to,
                    restored = plan.restores_stock,
                    "order status changed"
                );
                Order::try_from(updated)
            })
        })
        .await
    }

    async fn update_shipping_address(
        &self,
        actor: &Principal,
        order_id: i32,
        address: String,
    ) -> AppResult<Order> {
        validate_shipping_address(&address)?;
        let actor_id = actor.id;
        let mut conn = self.conn().await?;

        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let row: OrderRow = orders::table
                    .find(order_id)
                    .select(OrderRow::as_select())
                    .for_update()
                    .get_result(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ShopError::not_found("order", order_id))?;
                if row.user_id != actor_id {
                    return Err(
                        ShopError::forbidden("only the owner can change the shipping address").into(),
                    );
                }
                if row.status != OrderStatus::Pending.as_str() {
                    return Err(ShopError::validation(
                        "shipping address can only be changed while pending",
                    )
                    .into());
                }

                let updated = diesel::update(orders::table.find(order_id))
                    .set((
                        orders::shipping_address.eq(address),
                        orders::updated_at.eq(Utc::now()),
                    ))
                    .returning(OrderRow::as_returning())
                    .get_result(conn)
                    .await?;
                Order::try_from(updated)
            })
        })
        .await
    }

    async fn get_order(&self, id: i32) -> AppResult<Option<Order>> {
        let mut conn = self.conn().await?;
        let row = orders::table
            .find(id)
            .select(OrderRow::as_select())
            .first(&mut *conn)
            .await
            .optional()?;
        row.map(Order::try_from).transpose()
    }

    async fn get_order_items(&self, order_id: i32) -> AppResult<Vec<OrderItem>> {
        let mut conn = self.conn().await?;
        Ok(order_items::table
            .filter(order_items::order_id.eq(order_id))
            .order(order_items::id.asc())
            .select(OrderItem::as_select())
            .load(&mut *conn)
            .await?)
    }

    async fn list_user_orders(
        &self,
        user_id: i32,
        status: Option<OrderStatus>,
        page: Page,
    ) -> AppResult<Vec<Order>> {
        let mut conn = self.conn().await?;
        let mut query = orders::table
            .filter(orders::user_id.eq(user_id))
            .select(OrderRow::as_select())
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(orders::status.eq(status.as_str()));
        }
        let rows = query
            .order((orders::created_at.desc(), orders::id.desc()))
            .offset(page.offset)
            .limit(page.limit)
            .load(&mut *conn)
            .await?;
        into_orders(rows)
    }

    async fn list_orders_by_status(&self, status: OrderStatus, page: Page) -> AppResult<Vec<Order>> {
        let mut conn = self.conn().await?;
        let rows = orders::table
            .filter(orders::status.eq(status.as_str()))
            .order((orders::created_at.desc(), orders::id.desc()))
            .offset(page.offset)
            .limit(page.limit)
            .select(OrderRow::as_select())
            .load(&mut *conn)
            .await?;
        into_orders(rows)
    }

    async fn delete_order(&self, id: i32) -> AppResult<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(orders::table.find(id))
            .execute(&mut *conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn order_status_counts(&self, user_id: i32) -> AppResult<Vec<(OrderStatus, i64)>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(String, i64)> = orders::table
            .filter(orders::user_id.eq(user_id))
            .group_by(orders::status)
            .select((orders::status, count_star()))
            .load(&mut *conn)
            .await?;
        rows.into_iter()
            .map(|(status, count)| {
                let status = status
                    .parse::<OrderStatus>()
                    .map_err(|_| AppError::internal(format!("unknown order status '{status}'")))?;
                Ok((status, count))
            })
            .collect()
    }

    async fn paid_total(&self, user_id: i32) -> AppResult<Option<BigDecimal>> {
        let mut conn = self.conn().await?;
        Ok(orders::table
            .filter(orders::user_id.eq(user_id))
            .filter(orders::status.eq(OrderStatus::Paid.as_str()))
            .select(diesel::dsl::sum(orders::total_price))
            .first(&mut *conn)
            .await?)
    }
}
