//! Order creation, payment-provider hand-off and idempotent settlement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_core::{ids, RechargeOrder, UserId};
use tally_store::Store;

use crate::cache::{self, Cache, VALUE_TTL};
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::payment::{CreatePaymentRequest, PaymentClient, PaymentMethod};

/// Budget for the balance-cache refresh after a committed settlement.
const CACHE_REFRESH_TIMEOUT: Duration = Duration::from_secs(1);

/// Parameters of a recharge request.
#[derive(Debug, Clone)]
pub struct RechargeParams {
    /// The recharging user.
    pub user_id: UserId,
    /// Amount to credit, in cents.
    pub amount_cents: i64,
    /// Payment method; `None` defaults to Alipay.
    pub method: Option<PaymentMethod>,
    /// ISO currency code; required.
    pub currency: String,
    /// Where the provider redirects the payer afterwards.
    pub return_url: String,
    /// Where the provider posts the settlement callback.
    pub notify_url: String,
    /// The payer's IP, forwarded for provider risk checks.
    pub client_ip: String,
}

/// A created recharge order, ready for the payer.
#[derive(Debug, Clone)]
pub struct CreatedRecharge {
    /// The internal order id.
    pub order_id: String,
    /// Where to send the payer.
    pub pay_url: String,
}

/// Owns the `order_id ↔ payment_id` invariant: the provider's payment id is
/// reconciled with the internally generated order and the credit applied
/// exactly once.
pub struct RechargeCoordinator {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    payment: Option<Arc<dyn PaymentClient>>,
}

impl RechargeCoordinator {
    /// Wire the coordinator. A `None` payment client fails creates with
    /// [`EngineError::PaymentServiceUnavailable`].
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        payment: Option<Arc<dyn PaymentClient>>,
    ) -> Self {
        Self {
            store,
            cache,
            payment,
        }
    }

    /// Create a recharge order and hand it to the payment provider.
    ///
    /// The PENDING row is inserted before the provider call; if the provider
    /// then fails, the row is left behind; it has no credit effect and a
    /// later sweep may reap it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::CurrencyRequired`] / validation errors.
    /// - [`EngineError::PaymentServiceUnavailable`] with no provider wired.
    /// - [`EngineError::PaymentCreateFailed`] when the provider call fails.
    pub async fn create_recharge(&self, params: RechargeParams) -> Result<CreatedRecharge> {
        let started = Instant::now();

        if params.currency.is_empty() {
            return Err(EngineError::CurrencyRequired);
        }
        if params.amount_cents < 1 {
            return Err(EngineError::MissingRequiredField("amount_cents"));
        }

        let order_id = ids::mint_order_id(&params.user_id, chrono::Utc::now().timestamp());
        let order = RechargeOrder::pending(order_id.clone(), params.user_id.clone(), params.amount_cents);

        if let Err(err) = self.store.create_order(&order) {
            tracing::error!(order_id = %order_id, error = %err, "recharge order insert failed");
            metrics::record_recharge_order("failed");
            metrics::record_recharge("failed");
            return Err(err.into());
        }
        metrics::record_recharge_order("pending");

        let Some(payment) = &self.payment else {
            return Err(EngineError::PaymentServiceUnavailable);
        };

        let method = params.method.unwrap_or_default();
        let request = CreatePaymentRequest {
            order_id: order_id.clone(),
            user_id: params.user_id.to_string(),
            // Platform-level recharge: not tied to any of the user's apps.
            app_id: String::new(),
            amount_cents: params.amount_cents,
            currency: params.currency,
            method: method.code(),
            subject: format!(
                "Account recharge - {}.{:02}",
                params.amount_cents / 100,
                params.amount_cents % 100
            ),
            return_url: params.return_url,
            notify_url: params.notify_url,
            client_ip: params.client_ip,
        };

        let reply = match payment.create_payment(&request).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(order_id = %order_id, error = %err, "payment create failed");
                metrics::record_recharge("failed");
                metrics::record_recharge_duration("create", started.elapsed().as_secs_f64());
                return Err(err);
            }
        };

        metrics::record_recharge("success");
        metrics::record_recharge_amount("success", params.amount_cents);
        metrics::record_recharge_duration("create", started.elapsed().as_secs_f64());

        tracing::info!(
            order_id = %order_id,
            payment_id = %reply.payment_id,
            "recharge order created"
        );
        Ok(CreatedRecharge {
            order_id,
            pay_url: reply.pay_url,
        })
    }

    /// Settle a provider callback exactly once.
    ///
    /// Lookup order: the provider's `payment_id` first (the idempotency
    /// anchor), then the internal order id. An order already marked SUCCESS
    /// is a no-op success under duplicate delivery and racing threads; the
    /// store re-checks the status under the row lock before crediting.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::OrderNotFound`] when neither id matches.
    pub async fn settle_callback(
        &self,
        order_id: &str,
        payment_id: &str,
        amount_cents: i64,
    ) -> Result<()> {
        let started = Instant::now();

        let mut resolved_order_id = order_id.to_owned();
        if let Some(existing) = self.store.get_order_by_payment(payment_id)? {
            if existing.status == tally_core::OrderStatus::Success {
                tracing::info!(payment_id = %payment_id, "recharge already settled");
                return Ok(());
            }
            resolved_order_id = existing.order_id;
        } else {
            let existing = self
                .store
                .get_order(&resolved_order_id)?
                .ok_or_else(|| EngineError::OrderNotFound {
                    order_id: resolved_order_id.clone(),
                })?;
            if existing.status == tally_core::OrderStatus::Success {
                tracing::info!(order_id = %resolved_order_id, "recharge already settled");
                return Ok(());
            }
        }

        let settlement = self
            .store
            .settle_recharge(&resolved_order_id, payment_id, amount_cents)?;

        if !settlement.already_settled {
            metrics::record_recharge_order("success");
            metrics::record_recharge_amount("success", amount_cents);
        }
        metrics::record_recharge_duration("settle", started.elapsed().as_secs_f64());

        // Refresh the balance counter so the fast path sees the credit;
        // failure only delays visibility until the TTL expires.
        let key = cache::balance_key(&settlement.user_id);
        let refresh = self
            .cache
            .set_counter(&key, settlement.balance_cents, VALUE_TTL);
        match tokio::time::timeout(CACHE_REFRESH_TIMEOUT, refresh).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(key = %key, error = %err, "balance cache refresh failed");
            }
            Err(_) => tracing::warn!(key = %key, "balance cache refresh timed out"),
        }

        tracing::info!(
            order_id = %resolved_order_id,
            payment_id = %payment_id,
            balance_cents = settlement.balance_cents,
            already_settled = settlement.already_settled,
            "recharge callback settled"
        );
        Ok(())
    }
}
