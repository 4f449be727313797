use crate::{
    entities::commerce::{cart, cart_item, Cart, CartItem, CartItemModel, CartModel, Product, ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::stock_ledger::StockLedger,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, JoinType,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// One priced line of a cart snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub subtotal: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cart contents priced at the instant they were read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartLine>,
    pub total_items: i64,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Result of emptying a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ClearOutcome {
    pub items_removed: u64,
    pub message: String,
}

/// Per-user shopping cart store.
///
/// Every mutation checks the requested quantity against live stock at the
/// moment of the write. Stock may change afterwards; carts are not
/// re-validated until checkout reads them.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    stock: StockLedger,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        let stock = StockLedger::new(db.clone());
        Self {
            db,
            event_sender,
            stock,
        }
    }

    /// Returns the user's cart, creating an empty one on first access.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, user_id: Uuid) -> Result<CartModel, ServiceError> {
        let (cart, created) = Self::get_or_create_on(&*self.db, user_id).await?;
        if created {
            self.event_sender
                .send_or_log(Event::CartCreated {
                    cart_id: cart.id,
                    user_id,
                })
                .await;
        }
        Ok(cart)
    }

    /// Current snapshot of the user's cart.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create_cart(user_id).await?;
        Self::load_view(&*self.db, cart.id).await
    }

    /// Adds `quantity` units of a product, merging with an existing line.
    ///
    /// Runs in one transaction; on any failure nothing is written.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be greater than zero".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let product = StockLedger::product_on(&txn, product_id).await?;
        if !product.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Product {} is not available",
                product_id
            )));
        }

        let (cart, created) = Self::get_or_create_on(&txn, user_id).await?;
        let now = Utc::now();

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        let resulting_quantity = match existing {
            Some(item) => {
                let new_quantity = item.quantity.checked_add(quantity).ok_or_else(|| {
                    ServiceError::ValidationError("Quantity is too large".to_string())
                })?;
                if new_quantity > product.stock {
                    let remaining = product.stock - item.quantity;
                    return Err(ServiceError::insufficient_stock(
                        format!(
                            "Cannot add {} items. Only {} more available.",
                            quantity,
                            remaining.max(0)
                        ),
                        remaining,
                    ));
                }

                // Compare-and-set on the quantity we checked against
                let result = CartItem::update_many()
                    .col_expr(cart_item::Column::Quantity, Expr::value(new_quantity))
                    .col_expr(cart_item::Column::UpdatedAt, Expr::value(now))
                    .filter(cart_item::Column::Id.eq(item.id))
                    .filter(cart_item::Column::Quantity.eq(item.quantity))
                    .exec(&txn)
                    .await?;
                if result.rows_affected != 1 {
                    return Err(ServiceError::Conflict(
                        "Cart item was modified concurrently; retry the request".to_string(),
                    ));
                }
                new_quantity
            }
            None => {
                if quantity > product.stock {
                    return Err(ServiceError::insufficient_stock(
                        format!("Only {} items available in stock", product.stock.max(0)),
                        product.stock,
                    ));
                }

                let line = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                CartItem::insert(line)
                    .exec_without_returning(&txn)
                    .await
                    .map_err(|e| match e.sql_err() {
                        Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(
                            "Product was added to the cart concurrently; retry the request"
                                .to_string(),
                        ),
                        _ => ServiceError::DatabaseError(e),
                    })?;
                quantity
            }
        };

        Self::touch(&txn, cart.id).await?;
        let view = Self::load_view(&txn, cart.id).await?;
        txn.commit().await?;

        if created {
            self.event_sender
                .send_or_log(Event::CartCreated {
                    cart_id: cart.id,
                    user_id,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id,
                quantity,
            })
            .await;
        counter!("storefront_cart_mutations_total", 1, "op" => "add_item");

        info!(
            cart_id = %cart.id,
            %product_id,
            quantity,
            resulting_quantity,
            "added item to cart"
        );
        Ok(view)
    }

    /// Sets the quantity of one of the caller's cart lines.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be greater than zero".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let item = Self::owned_item(&txn, user_id, item_id).await?;
        let product = StockLedger::product_on(&txn, item.product_id).await?;
        if quantity > product.stock {
            return Err(ServiceError::insufficient_stock(
                format!("Only {} items available in stock", product.stock.max(0)),
                product.stock,
            ));
        }

        let cart_id = item.cart_id;
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        Self::touch(&txn, cart_id).await?;
        let view = Self::load_view(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                cart_id,
                item_id,
                quantity,
            })
            .await;
        counter!("storefront_cart_mutations_total", 1, "op" => "update_item");

        Ok(view)
    }

    /// Deletes one of the caller's cart lines.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let item = Self::owned_item(&txn, user_id, item_id).await?;
        let result = CartItem::delete_by_id(item.id).exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound("Cart item not found".to_string()));
        }

        Self::touch(&txn, item.cart_id).await?;
        let view = Self::load_view(&txn, item.cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: item.cart_id,
                item_id,
            })
            .await;
        counter!("storefront_cart_mutations_total", 1, "op" => "remove_item");

        Ok(view)
    }

    /// Removes every line from the user's cart.
    ///
    /// Clearing a missing or empty cart is a successful no-op.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<ClearOutcome, ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;

        let Some(cart) = cart else {
            return Ok(ClearOutcome {
                items_removed: 0,
                message: "Cart is already empty".to_string(),
            });
        };

        let result = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&*self.db)
            .await?;
        let items_removed = result.rows_affected;

        if items_removed > 0 {
            Self::touch(&*self.db, cart.id).await?;
        }

        self.event_sender
            .send_or_log(Event::CartCleared {
                cart_id: cart.id,
                items_removed,
            })
            .await;
        counter!("storefront_cart_mutations_total", 1, "op" => "clear");

        info!(cart_id = %cart.id, items_removed, "cleared cart");
        Ok(ClearOutcome {
            items_removed,
            message: format!("{} items removed", items_removed),
        })
    }

    /// Loads and prices a cart on `conn`.
    pub(crate) async fn load_view<C: ConnectionTrait>(
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let rows = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_desc(cart_item::Column::CreatedAt)
            .order_by_asc(cart_item::Column::Id)
            .find_also_related(Product)
            .all(conn)
            .await?;

        Ok(build_view(cart, rows))
    }

    async fn get_or_create_on<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<(CartModel, bool), ServiceError> {
        if let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?
        {
            return Ok((cart, false));
        }

        let now = Utc::now();
        let candidate = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // A concurrent first access may win the insert; both end up reading its row
        let inserted = Cart::insert(candidate)
            .on_conflict(
                OnConflict::column(cart::Column::UserId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("cart for user {} missing after insert", user_id))
            })?;

        Ok((cart, inserted > 0))
    }

    /// Finds a cart line only if it belongs to `user_id`'s cart.
    ///
    /// Lines owned by someone else are reported exactly like missing ones.
    async fn owned_item<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartItemModel, ServiceError> {
        CartItem::find_by_id(item_id)
            .join(JoinType::InnerJoin, cart_item::Relation::Cart.def())
            .filter(cart::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart item not found".to_string()))
    }

    async fn touch<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<(), ServiceError> {
        Cart::update_many()
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(())
    }

    pub fn stock(&self) -> &StockLedger {
        &self.stock
    }
}

/// Prices cart rows. Rows whose product vanished are dropped.
fn build_view(cart: CartModel, rows: Vec<(CartItemModel, Option<ProductModel>)>) -> CartView {
    let mut items = Vec::with_capacity(rows.len());
    let mut total_items: i64 = 0;
    let mut total_price = Decimal::ZERO;

    for (item, product) in rows {
        let Some(product) = product else {
            warn!(item_id = %item.id, product_id = %item.product_id, "cart item references missing product");
            continue;
        };

        let subtotal = product.price * Decimal::from(item.quantity);
        total_items += i64::from(item.quantity);
        total_price += subtotal;

        items.push(CartLine {
            id: item.id,
            product_id: product.id,
            product_name: product.name,
            unit_price: product.price,
            quantity: item.quantity,
            subtotal,
            created_at: item.created_at,
            updated_at: item.updated_at,
        });
    }

    CartView {
        id: cart.id,
        user_id: cart.user_id,
        items,
        total_items,
        total_price,
        created_at: cart.created_at,
        updated_at: cart.updated_at,
    }
}
