//! PostgreSQL-backed stock store.
//!
//! Every trait method runs inside a single transaction, so each compound
//! operation (reserve, commit, restore) is atomic. Concurrent writers are
//! serialized by row locks on `stock_levels` and backstopped by the unique
//! indexes on order numbers and idempotency keys.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, OrderId, ProductId, ReservationId, StoreId, VariantId};
use domain::{
    AuditAction, AuditEntry, ItemRef, Order, OrderDraft, OrderItem, OrderStatus, Reservation,
    ReservationRequest, ReservationStatus, StockAdjustmentReason, StockAvailability, StockEffect,
    StockLevel, stock_effect,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::{
    CommittedOrder, OrderRemoval, ReservationBatch, ReservationFailure, StockStore,
    validate_reservation_requests,
};

/// How many times a commit retries after losing an order-number race.
/// Each lost attempt means another commit took the number and committed,
/// so the bound only matters under sustained contention.
const ORDER_NUMBER_ATTEMPTS: u32 = 5;

/// PostgreSQL-backed stock store implementation.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    /// Creates a new PostgreSQL stock store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// One commit attempt inside one transaction. A `Database` error
    /// carrying the `orders_number_key` constraint means another commit
    /// took the number first; the caller retries with a fresh read.
    async fn commit_order_in_tx(
        &self,
        store_id: StoreId,
        draft: OrderDraft,
        now: DateTime<Utc>,
    ) -> Result<CommittedOrder> {
        let mut tx = self.pool.begin().await?;

        // Idempotency replay: an existing order under this key is returned
        // unchanged, with no second deduction.
        if let Some(key) = draft.idempotency_key.as_deref()
            && let Some(existing) = load_order_by_key(&mut tx, store_id, key).await?
        {
            tx.rollback().await?;
            return Ok(CommittedOrder {
                order: existing,
                replayed: true,
            });
        }

        validate_lines_against_ledger(&mut tx, store_id, &draft.items).await?;

        let date = now.date_naive();
        let prefix = format!("{}%", domain::order_number_prefix(date));
        let highest: Option<String> = sqlx::query_scalar(
            r#"
            SELECT order_number FROM orders
            WHERE store_id = $1 AND order_number LIKE $2
            ORDER BY length(order_number) DESC, order_number DESC
            LIMIT 1
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(&prefix)
        .fetch_optional(&mut *tx)
        .await?;
        let order_number = domain::next_order_number(highest.as_deref(), date);

        let cart_id = draft.cart_id;
        let idempotency_key = draft.idempotency_key.clone();
        let order = Order::from_draft(store_id, order_number, draft, now);

        if let Err(e) = insert_order(&mut tx, &order).await {
            // A concurrent commit with the same key won the race; return
            // its order instead of failing the retry.
            if is_constraint_violation(&e, "orders_idempotency_key")
                && let Some(key) = idempotency_key
            {
                drop(tx);
                let mut conn = self.pool.acquire().await?;
                if let Some(existing) = load_order_by_key(&mut conn, store_id, &key).await? {
                    return Ok(CommittedOrder {
                        order: existing,
                        replayed: true,
                    });
                }
            }
            return Err(StoreError::Database(e));
        }

        // Ledger deduction, one audit entry per line. The lines were
        // validated under the same row locks, so this cannot go negative.
        for line in &order.items {
            adjust_in_tx(
                &mut tx,
                store_id,
                line.item(),
                -i64::from(line.quantity),
                StockAdjustmentReason::OrderPlaced,
                Some(order.id),
                None,
                now,
            )
            .await?;
        }

        // Consume the cart's active holds; their stock is now permanently
        // deducted, so they must stop counting toward reserved quantity.
        if let Some(cart_id) = cart_id {
            let rows = sqlx::query(
                r#"
                UPDATE reservations SET status = 'consumed', order_id = $3
                WHERE store_id = $1 AND cart_id = $2 AND status = 'active'
                RETURNING *
                "#,
            )
            .bind(store_id.as_uuid())
            .bind(cart_id.as_uuid())
            .bind(order.id.as_uuid())
            .fetch_all(&mut *tx)
            .await?;
            for row in rows {
                let reservation = row_to_reservation(row)?;
                let entry = AuditEntry::for_reservation(
                    AuditAction::ReservationConsumed,
                    &reservation,
                    Some(order.id),
                    now,
                );
                insert_audit(&mut tx, &entry).await?;
            }
        }

        tx.commit().await?;
        Ok(CommittedOrder {
            order,
            replayed: false,
        })
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

fn item_from_columns(product_id: Uuid, variant_id: Option<Uuid>) -> ItemRef {
    ItemRef::from_parts(
        ProductId::from_uuid(product_id),
        variant_id.map(VariantId::from_uuid),
    )
}

fn row_to_stock_level(row: PgRow) -> Result<StockLevel> {
    Ok(StockLevel {
        store_id: StoreId::from_uuid(row.try_get("store_id")?),
        item: item_from_columns(row.try_get("product_id")?, row.try_get("variant_id")?),
        total_quantity: row.try_get("total_quantity")?,
        low_stock_threshold: row.try_get("low_stock_threshold")?,
    })
}

fn row_to_reservation(row: PgRow) -> Result<Reservation> {
    let status: String = row.try_get("status")?;
    let order_id: Option<Uuid> = row.try_get("order_id")?;
    let status = match (status.as_str(), order_id) {
        ("active", _) => ReservationStatus::Active,
        ("expired", _) => ReservationStatus::Expired,
        ("released", _) => ReservationStatus::Released,
        ("consumed", Some(order_id)) => ReservationStatus::Consumed {
            order_id: OrderId::from_uuid(order_id),
        },
        ("consumed", None) => {
            return Err(StoreError::Decode(
                "consumed reservation without an order id".to_string(),
            ));
        }
        (other, _) => {
            return Err(StoreError::Decode(format!(
                "unknown reservation status: {other}"
            )));
        }
    };

    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("id")?),
        store_id: StoreId::from_uuid(row.try_get("store_id")?),
        item: item_from_columns(row.try_get("product_id")?, row.try_get("variant_id")?),
        quantity: row.try_get("quantity")?,
        cart_id: row.try_get::<Option<Uuid>, _>("cart_id")?.map(CartId::from_uuid),
        status,
        expires_at: row.try_get("expires_at")?,
        extended_at: row.try_get("extended_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_order_item(row: PgRow) -> Result<OrderItem> {
    let quantity: i64 = row.try_get("quantity")?;
    Ok(OrderItem {
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        variant_id: row
            .try_get::<Option<Uuid>, _>("variant_id")?
            .map(VariantId::from_uuid),
        product_name: row.try_get("product_name")?,
        sku: row.try_get("sku")?,
        image_url: row.try_get("image_url")?,
        quantity: u32::try_from(quantity)
            .map_err(|_| StoreError::Decode(format!("order item quantity out of range: {quantity}")))?,
        unit_price: common::Money::from_cents(row.try_get("unit_price_cents")?),
        line_total: common::Money::from_cents(row.try_get("line_total_cents")?),
    })
}

/// Maps an `orders` row to an order with an empty item list; the caller
/// loads the items separately.
fn row_to_order_header(row: PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let status = OrderStatus::parse(&status)
        .ok_or_else(|| StoreError::Decode(format!("unknown order status: {status}")))?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id")?),
        store_id: StoreId::from_uuid(row.try_get("store_id")?),
        order_number: row.try_get("order_number")?,
        status,
        idempotency_key: row.try_get("idempotency_key")?,
        customer_name: row.try_get("customer_name")?,
        customer_email: row.try_get("customer_email")?,
        shipping_address: row.try_get("shipping_address")?,
        payment_method: row.try_get("payment_method")?,
        items: Vec::new(),
        subtotal: common::Money::from_cents(row.try_get("subtotal_cents")?),
        total: common::Money::from_cents(row.try_get("total_cents")?),
        created_at: row.try_get("created_at")?,
        delivered_at: row.try_get("delivered_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn row_to_audit_entry(row: PgRow) -> Result<AuditEntry> {
    let action: String = row.try_get("action")?;
    let action = AuditAction::parse(&action)
        .ok_or_else(|| StoreError::Decode(format!("unknown audit action: {action}")))?;
    let reason = row
        .try_get::<Option<String>, _>("reason")?
        .map(|r| {
            StockAdjustmentReason::parse(&r)
                .ok_or_else(|| StoreError::Decode(format!("unknown adjustment reason: {r}")))
        })
        .transpose()?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        store_id: StoreId::from_uuid(row.try_get("store_id")?),
        action,
        item: {
            let product_id: Option<Uuid> = row.try_get("product_id")?;
            let variant_id: Option<Uuid> = row.try_get("variant_id")?;
            product_id.map(|product_id| item_from_columns(product_id, variant_id))
        },
        reservation_id: row
            .try_get::<Option<Uuid>, _>("reservation_id")?
            .map(ReservationId::from_uuid),
        order_id: row
            .try_get::<Option<Uuid>, _>("order_id")?
            .map(OrderId::from_uuid),
        quantity_delta: row.try_get("quantity_delta")?,
        quantity_before: row.try_get("quantity_before")?,
        quantity_after: row.try_get("quantity_after")?,
        reason,
        actor: row.try_get("actor")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_audit(conn: &mut PgConnection, entry: &AuditEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, store_id, action, product_id, variant_id, reservation_id,
                               order_id, quantity_delta, quantity_before, quantity_after,
                               reason, actor, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(entry.id)
    .bind(entry.store_id.as_uuid())
    .bind(entry.action.as_str())
    .bind(entry.item.map(|i| i.product_id().as_uuid()))
    .bind(entry.item.and_then(|i| i.variant_id()).map(|v| v.as_uuid()))
    .bind(entry.reservation_id.map(|r| r.as_uuid()))
    .bind(entry.order_id.map(|o| o.as_uuid()))
    .bind(entry.quantity_delta)
    .bind(entry.quantity_before)
    .bind(entry.quantity_after)
    .bind(entry.reason.map(|r| r.as_str()))
    .bind(entry.actor.as_deref())
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_reservation(conn: &mut PgConnection, reservation: &Reservation) -> Result<()> {
    let order_id = match reservation.status {
        ReservationStatus::Consumed { order_id } => Some(order_id.as_uuid()),
        _ => None,
    };
    sqlx::query(
        r#"
        INSERT INTO reservations (id, store_id, product_id, variant_id, quantity, cart_id,
                                  status, order_id, expires_at, extended_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(reservation.id.as_uuid())
    .bind(reservation.store_id.as_uuid())
    .bind(reservation.item.product_id().as_uuid())
    .bind(reservation.item.variant_id().map(|v| v.as_uuid()))
    .bind(reservation.quantity)
    .bind(reservation.cart_id.map(|c| c.as_uuid()))
    .bind(reservation.status.as_str())
    .bind(order_id)
    .bind(reservation.expires_at)
    .bind(reservation.extended_at)
    .bind(reservation.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Reads and locks the on-hand quantity for an item. `None` means no
/// ledger row exists. The row lock serializes concurrent reservation and
/// commit transactions touching the same item.
async fn lock_on_hand(
    conn: &mut PgConnection,
    store_id: StoreId,
    item: ItemRef,
) -> Result<Option<i64>> {
    let total: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT total_quantity FROM stock_levels
        WHERE store_id = $1 AND product_id = $2 AND variant_id IS NOT DISTINCT FROM $3
        FOR UPDATE
        "#,
    )
    .bind(store_id.as_uuid())
    .bind(item.product_id().as_uuid())
    .bind(item.variant_id().map(|v| v.as_uuid()))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(total)
}

/// Sum of quantities held by active, unexpired reservations of an item.
async fn active_reserved(
    conn: &mut PgConnection,
    store_id: StoreId,
    item: ItemRef,
    now: DateTime<Utc>,
) -> Result<i64> {
    let reserved: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM reservations
        WHERE store_id = $1 AND product_id = $2 AND variant_id IS NOT DISTINCT FROM $3
          AND status = 'active' AND expires_at > $4
        "#,
    )
    .bind(store_id.as_uuid())
    .bind(item.product_id().as_uuid())
    .bind(item.variant_id().map(|v| v.as_uuid()))
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(reserved)
}

/// Adjusts the ledger by `delta` inside the caller's transaction, refusing
/// to go negative, and writes the audit entry. Returns the new quantity.
#[allow(clippy::too_many_arguments)]
async fn adjust_in_tx(
    conn: &mut PgConnection,
    store_id: StoreId,
    item: ItemRef,
    delta: i64,
    reason: StockAdjustmentReason,
    order_id: Option<OrderId>,
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let after: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE stock_levels
        SET total_quantity = total_quantity + $4, updated_at = now()
        WHERE store_id = $1 AND product_id = $2 AND variant_id IS NOT DISTINCT FROM $3
          AND total_quantity + $4 >= 0
        RETURNING total_quantity
        "#,
    )
    .bind(store_id.as_uuid())
    .bind(item.product_id().as_uuid())
    .bind(item.variant_id().map(|v| v.as_uuid()))
    .bind(delta)
    .fetch_optional(&mut *conn)
    .await?;

    let after = match after {
        Some(after) => after,
        None => {
            // Distinguish a missing ledger row from an adjustment that
            // would go negative.
            let before = lock_on_hand(conn, store_id, item)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "stock level",
                    id: item.to_string(),
                })?;
            return Err(StoreError::InsufficientStock {
                item,
                requested: -delta,
                available: before,
            });
        }
    };

    let entry = AuditEntry::for_stock_adjustment(
        store_id,
        item,
        delta,
        after - delta,
        after,
        reason,
        order_id,
        now,
    )
    .with_actor(actor);
    insert_audit(conn, &entry).await?;
    Ok(after)
}

async fn fetch_order_items(conn: &mut PgConnection, order_id: OrderId) -> Result<Vec<OrderItem>> {
    let rows = sqlx::query(
        "SELECT * FROM order_items WHERE order_id = $1 ORDER BY position",
    )
    .bind(order_id.as_uuid())
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(row_to_order_item).collect()
}

async fn load_order(
    conn: &mut PgConnection,
    store_id: StoreId,
    id: OrderId,
) -> Result<Option<Order>> {
    let row = sqlx::query("SELECT * FROM orders WHERE store_id = $1 AND id = $2")
        .bind(store_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut order = row_to_order_header(row)?;
    order.items = fetch_order_items(conn, order.id).await?;
    Ok(Some(order))
}

async fn load_order_by_key(
    conn: &mut PgConnection,
    store_id: StoreId,
    key: &str,
) -> Result<Option<Order>> {
    let row = sqlx::query("SELECT * FROM orders WHERE store_id = $1 AND idempotency_key = $2")
        .bind(store_id.as_uuid())
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut order = row_to_order_header(row)?;
    order.items = fetch_order_items(conn, order.id).await?;
    Ok(Some(order))
}

/// Validates every order line against the ledger under row locks,
/// tracking the running deduction so duplicate lines of one item cannot
/// collectively oversell.
async fn validate_lines_against_ledger(
    conn: &mut PgConnection,
    store_id: StoreId,
    items: &[OrderItem],
) -> Result<()> {
    let mut remaining: HashMap<ItemRef, i64> = HashMap::new();
    for line in items {
        let item = line.item();
        let available = match remaining.get(&item) {
            Some(available) => *available,
            None => lock_on_hand(conn, store_id, item).await?.unwrap_or(0),
        };
        let requested = i64::from(line.quantity);
        if requested > available {
            return Err(StoreError::InsufficientStock {
                item,
                requested,
                available,
            });
        }
        remaining.insert(item, available - requested);
    }
    Ok(())
}

async fn insert_order(conn: &mut PgConnection, order: &Order) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO orders (id, store_id, order_number, status, idempotency_key,
                            customer_name, customer_email, shipping_address, payment_method,
                            subtotal_cents, total_cents, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(order.id.as_uuid())
    .bind(order.store_id.as_uuid())
    .bind(&order.order_number)
    .bind(order.status.as_str())
    .bind(order.idempotency_key.as_deref())
    .bind(&order.customer_name)
    .bind(&order.customer_email)
    .bind(order.shipping_address.as_deref())
    .bind(&order.payment_method)
    .bind(order.subtotal.cents())
    .bind(order.total.cents())
    .bind(order.created_at)
    .execute(&mut *conn)
    .await?;

    for (position, item) in order.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_items (id, order_id, position, product_id, variant_id,
                                     product_name, sku, image_url, quantity,
                                     unit_price_cents, line_total_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.id.as_uuid())
        .bind(position as i32)
        .bind(item.product_id.as_uuid())
        .bind(item.variant_id.map(|v| v.as_uuid()))
        .bind(&item.product_name)
        .bind(&item.sku)
        .bind(item.image_url.as_deref())
        .bind(i64::from(item.quantity))
        .bind(item.unit_price.cents())
        .bind(item.line_total.cents())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn is_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn upsert_stock_level(&self, level: StockLevel) -> Result<()> {
        // The two partial unique indexes need two conflict targets.
        let query = if level.item.variant_id().is_some() {
            r#"
            INSERT INTO stock_levels (store_id, product_id, variant_id, total_quantity, low_stock_threshold)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (store_id, product_id, variant_id) WHERE variant_id IS NOT NULL
            DO UPDATE SET total_quantity = EXCLUDED.total_quantity,
                          low_stock_threshold = EXCLUDED.low_stock_threshold,
                          updated_at = now()
            "#
        } else {
            r#"
            INSERT INTO stock_levels (store_id, product_id, variant_id, total_quantity, low_stock_threshold)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (store_id, product_id) WHERE variant_id IS NULL
            DO UPDATE SET total_quantity = EXCLUDED.total_quantity,
                          low_stock_threshold = EXCLUDED.low_stock_threshold,
                          updated_at = now()
            "#
        };
        sqlx::query(query)
            .bind(level.store_id.as_uuid())
            .bind(level.item.product_id().as_uuid())
            .bind(level.item.variant_id().map(|v| v.as_uuid()))
            .bind(level.total_quantity)
            .bind(level.low_stock_threshold)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stock_level(&self, store_id: StoreId, item: ItemRef) -> Result<Option<StockLevel>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM stock_levels
            WHERE store_id = $1 AND product_id = $2 AND variant_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(item.product_id().as_uuid())
        .bind(item.variant_id().map(|v| v.as_uuid()))
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_stock_level).transpose()
    }

    async fn adjust_stock(
        &self,
        store_id: StoreId,
        item: ItemRef,
        delta: i64,
        reason: StockAdjustmentReason,
        order_id: Option<OrderId>,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let after = adjust_in_tx(&mut tx, store_id, item, delta, reason, order_id, actor, now).await?;
        tx.commit().await?;
        Ok(after)
    }

    async fn availability(
        &self,
        store_id: StoreId,
        item: ItemRef,
        now: DateTime<Utc>,
    ) -> Result<StockAvailability> {
        let mut conn = self.pool.acquire().await?;
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT total_quantity FROM stock_levels
            WHERE store_id = $1 AND product_id = $2 AND variant_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(item.product_id().as_uuid())
        .bind(item.variant_id().map(|v| v.as_uuid()))
        .fetch_optional(&mut *conn)
        .await?;
        let reserved = active_reserved(&mut conn, store_id, item, now).await?;
        Ok(StockAvailability::compute(total.unwrap_or(0), reserved))
    }

    async fn create_reservations(
        &self,
        store_id: StoreId,
        requests: &[ReservationRequest],
        cart_id: Option<CartId>,
        ttl_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<ReservationBatch> {
        validate_reservation_requests(requests, ttl_minutes)?;

        let mut tx = self.pool.begin().await?;
        let mut created: Vec<Reservation> = Vec::new();
        let mut failures = Vec::new();
        // Availability per item as seen at the start of this batch, minus
        // what earlier lines of the batch already claimed.
        let mut remaining: HashMap<ItemRef, i64> = HashMap::new();

        for request in requests {
            let available = match remaining.get(&request.item) {
                Some(available) => *available,
                None => {
                    let total = lock_on_hand(&mut tx, store_id, request.item)
                        .await?
                        .unwrap_or(0);
                    let reserved = active_reserved(&mut tx, store_id, request.item, now).await?;
                    (total - reserved).max(0)
                }
            };

            if request.quantity > available {
                failures.push(ReservationFailure {
                    item: request.item,
                    requested: request.quantity,
                    available,
                });
                remaining.insert(request.item, available);
            } else {
                remaining.insert(request.item, available - request.quantity);
                created.push(Reservation::new(
                    store_id,
                    request.item,
                    request.quantity,
                    cart_id,
                    ttl_minutes,
                    now,
                ));
            }
        }

        // An exhausted batch rolls back entirely: nothing is persisted.
        if created.is_empty() {
            tx.rollback().await?;
            return Ok(ReservationBatch {
                reservations: vec![],
                failures,
            });
        }

        for reservation in &created {
            insert_reservation(&mut tx, reservation).await?;
            let entry =
                AuditEntry::for_reservation(AuditAction::ReservationCreated, reservation, None, now);
            insert_audit(&mut tx, &entry).await?;
        }

        tx.commit().await?;
        Ok(ReservationBatch {
            reservations: created,
            failures,
        })
    }

    async fn reservation(
        &self,
        store_id: StoreId,
        id: ReservationId,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query("SELECT * FROM reservations WHERE store_id = $1 AND id = $2")
            .bind(store_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_reservation).transpose()
    }

    async fn release_reservation(&self, store_id: StoreId, id: ReservationId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            UPDATE reservations SET status = 'released'
            WHERE store_id = $1 AND id = $2 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        // Missing or already terminal: a no-op, so release is idempotent.
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let reservation = row_to_reservation(row)?;
        let entry = AuditEntry::for_reservation(
            AuditAction::ReservationReleased,
            &reservation,
            None,
            Utc::now(),
        );
        insert_audit(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn release_cart_reservations(&self, store_id: StoreId, cart_id: CartId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            UPDATE reservations SET status = 'released'
            WHERE store_id = $1 AND cart_id = $2 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(cart_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        let now = Utc::now();
        let mut released = 0;
        for row in rows {
            let reservation = row_to_reservation(row)?;
            let entry =
                AuditEntry::for_reservation(AuditAction::ReservationReleased, &reservation, None, now);
            insert_audit(&mut tx, &entry).await?;
            released += 1;
        }
        tx.commit().await?;
        Ok(released)
    }

    async fn extend_reservation(
        &self,
        store_id: StoreId,
        id: ReservationId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT * FROM reservations
            WHERE store_id = $1 AND id = $2 AND status = 'active'
            FOR UPDATE
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "reservation",
            id: id.to_string(),
        })?;

        let mut reservation = row_to_reservation(row)?;
        reservation.extend(minutes, now)?;

        sqlx::query("UPDATE reservations SET expires_at = $2, extended_at = $3 WHERE id = $1")
            .bind(reservation.id.as_uuid())
            .bind(reservation.expires_at)
            .bind(reservation.extended_at)
            .execute(&mut *tx)
            .await?;

        let entry =
            AuditEntry::for_reservation(AuditAction::ReservationExtended, &reservation, None, now);
        insert_audit(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    async fn expire_due_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            UPDATE reservations SET status = 'expired'
            WHERE status = 'active' AND expires_at <= $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in rows {
            let reservation = row_to_reservation(row)?;
            let entry =
                AuditEntry::for_reservation(AuditAction::ReservationExpired, &reservation, None, now);
            insert_audit(&mut tx, &entry).await?;
            expired.push(reservation);
        }
        tx.commit().await?;
        Ok(expired)
    }

    async fn commit_order(
        &self,
        store_id: StoreId,
        draft: OrderDraft,
        now: DateTime<Utc>,
    ) -> Result<CommittedOrder> {
        draft.validate()?;

        // Two commits racing on the same day can read the same highest
        // order number; the loser's insert trips the unique number index
        // and aborts its transaction, so it restarts from a fresh read.
        let mut attempt = 1;
        loop {
            match self.commit_order_in_tx(store_id, draft.clone(), now).await {
                Err(StoreError::Database(e))
                    if is_constraint_violation(&e, "orders_number_key")
                        && attempt < ORDER_NUMBER_ATTEMPTS =>
                {
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn order(&self, store_id: StoreId, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        load_order(&mut conn, store_id, id).await
    }

    async fn order_by_idempotency_key(
        &self,
        store_id: StoreId,
        key: &str,
    ) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        load_order_by_key(&mut conn, store_id, key).await
    }

    async fn update_order_status(
        &self,
        store_id: StoreId,
        id: OrderId,
        to: OrderStatus,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM orders WHERE store_id = $1 AND id = $2 FOR UPDATE")
            .bind(store_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "order",
                id: id.to_string(),
            })?;

        let mut order = row_to_order_header(row)?;
        order.items = fetch_order_items(&mut tx, order.id).await?;

        let from = order.status;
        order.apply_status(to, now)?;

        match stock_effect(from, to) {
            StockEffect::None => {}
            StockEffect::Restore(reason) => {
                for line in &order.items {
                    adjust_in_tx(
                        &mut tx,
                        store_id,
                        line.item(),
                        i64::from(line.quantity),
                        reason,
                        Some(order.id),
                        actor,
                        now,
                    )
                    .await?;
                }
            }
            StockEffect::Rededuct => {
                // Check every line before touching the ledger so a failure
                // leaves no partial deduction.
                validate_lines_against_ledger(&mut tx, store_id, &order.items).await?;
                for line in &order.items {
                    adjust_in_tx(
                        &mut tx,
                        store_id,
                        line.item(),
                        -i64::from(line.quantity),
                        StockAdjustmentReason::OrderReactivated,
                        Some(order.id),
                        actor,
                        now,
                    )
                    .await?;
                }
            }
        }

        sqlx::query(
            r#"
            UPDATE orders SET status = $2, delivered_at = $3, cancelled_at = $4
            WHERE id = $1
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.delivered_at)
        .bind(order.cancelled_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn delete_order(
        &self,
        store_id: StoreId,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<OrderRemoval> {
        let mut tx = self.pool.begin().await?;
        let status: String = sqlx::query_scalar(
            "SELECT status FROM orders WHERE store_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(store_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "order",
            id: id.to_string(),
        })?;

        let status = OrderStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("unknown order status: {status}")))?;

        let removal = if status.allows_hard_delete() {
            // Line items go with the order via ON DELETE CASCADE.
            sqlx::query("DELETE FROM orders WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await?;
            OrderRemoval::Hard
        } else {
            sqlx::query("UPDATE orders SET deleted_at = $2 WHERE id = $1")
                .bind(id.as_uuid())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            OrderRemoval::Soft
        };
        tx.commit().await?;
        Ok(removal)
    }

    async fn audit_trail(&self, store_id: StoreId, limit: usize) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM audit_log
            WHERE store_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_audit_entry).collect()
    }
}
