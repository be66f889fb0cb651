//! Billing creation, payment recording and the payment gates.
//!
//! [`ensure_unlockable`] and [`ensure_paid`] are the two predicates other workflows consult:
//! unlock refuses once any payment has started, final discharge refuses until the bill is
//! settled.

use crate::error::{CareError, CareResult};
use crate::model::{Billing, BillingItem, PaymentStatus, VisitStatus};
use crate::status::{self, TransitionContext, TransitionOrigin};
use crate::store::rows;
use crate::store::Store;
use crate::NonEmptyText;
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// A line on a new bill.
#[derive(Clone, Debug)]
pub struct NewBillingItem {
    pub description: NonEmptyText,
    pub amount: i64,
}

/// A billing with its line items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct BillingStatement {
    pub billing: Billing,
    pub items: Vec<BillingItem>,
}

#[derive(Clone, Debug)]
pub struct BillingService {
    store: Store,
}

impl BillingService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Creates the bill for a visit and moves the visit to `billed`.
    ///
    /// # Errors
    ///
    /// - `VisitNotFound`,
    /// - `InvalidTransition` unless the visit is `ready_for_billing`,
    /// - `BillingExists`,
    /// - `InvalidInput` for an empty item list or a non-positive amount.
    pub fn create_billing(
        &self,
        visit_id: Uuid,
        items: &[NewBillingItem],
    ) -> CareResult<BillingStatement> {
        let statement = self.store.write("create_billing", |tx| {
            let now = Utc::now();
            let mut visit = rows::require_visit(tx, visit_id)?;
            if visit.status != VisitStatus::ReadyForBilling {
                return Err(CareError::InvalidTransition {
                    from: visit.status,
                    to: VisitStatus::Billed,
                });
            }
            if rows::billing_for_visit(tx, visit_id)?.is_some() {
                return Err(CareError::BillingExists(visit_id));
            }
            let total_amount = validate_items(items)?;

            let billing = Billing {
                id: Uuid::new_v4(),
                visit_id,
                total_amount,
                paid_amount: 0,
                payment_status: PaymentStatus::Pending,
                created_at: now,
            };
            rows::insert_billing(tx, &billing)?;

            let items = items
                .iter()
                .map(|item| {
                    let item = BillingItem {
                        id: Uuid::new_v4(),
                        billing_id: billing.id,
                        description: item.description.to_string(),
                        amount: item.amount,
                    };
                    rows::insert_billing_item(tx, &item)?;
                    Ok(item)
                })
                .collect::<CareResult<Vec<_>>>()?;

            status::transition(
                &mut visit,
                VisitStatus::Billed,
                &TransitionContext::new(TransitionOrigin::BillingCreated, now),
            )?;
            rows::update_visit(tx, &visit)?;
            Ok(BillingStatement { billing, items })
        })?;

        tracing::info!(
            visit = %visit_id,
            total = statement.billing.total_amount,
            items = statement.items.len(),
            "billing created"
        );
        Ok(statement)
    }

    /// Adds a payment to a visit's bill.
    ///
    /// Settling the bill moves the visit from `billed` to `paid`.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a non-positive amount,
    /// - `VisitNotFound`, `BillingMissing`, `AlreadyPaid`,
    /// - `VisitClosed` for a completed or cancelled visit, `InvalidTransition` for any other
    ///   status than `billed`,
    /// - `Overpayment`.
    pub fn record_payment(&self, visit_id: Uuid, amount: i64) -> CareResult<Billing> {
        if amount <= 0 {
            return Err(CareError::InvalidInput(format!(
                "payment amount must be positive, got {amount}"
            )));
        }

        let billing = self.store.write("record_payment", |tx| {
            let mut visit = rows::require_visit(tx, visit_id)?;
            let mut billing = rows::billing_for_visit(tx, visit_id)?
                .ok_or(CareError::BillingMissing(visit_id))?;
            if billing.payment_status == PaymentStatus::Paid {
                return Err(CareError::AlreadyPaid(visit_id));
            }
            if visit.status.is_terminal() {
                return Err(CareError::VisitClosed {
                    visit: visit_id,
                    status: visit.status,
                });
            }
            if visit.status != VisitStatus::Billed {
                return Err(CareError::InvalidTransition {
                    from: visit.status,
                    to: VisitStatus::Paid,
                });
            }
            if amount > billing.outstanding() {
                return Err(CareError::Overpayment {
                    visit: visit_id,
                    amount,
                    outstanding: billing.outstanding(),
                });
            }

            billing.paid_amount += amount;
            billing.payment_status = if billing.outstanding() == 0 {
                PaymentStatus::Paid
            } else {
                PaymentStatus::Partial
            };
            rows::update_billing_payment(tx, &billing)?;

            if billing.payment_status == PaymentStatus::Paid {
                status::transition(
                    &mut visit,
                    VisitStatus::Paid,
                    &TransitionContext::new(TransitionOrigin::Payment, Utc::now()),
                )?;
                rows::update_visit(tx, &visit)?;
            }
            Ok(billing)
        })?;

        tracing::info!(
            visit = %visit_id,
            amount,
            paid = billing.paid_amount,
            status = %billing.payment_status,
            "payment recorded"
        );
        Ok(billing)
    }

    pub fn get_billing(&self, visit_id: Uuid) -> CareResult<BillingStatement> {
        self.store.read(|conn| {
            let billing = rows::billing_for_visit(conn, visit_id)?
                .ok_or(CareError::BillingMissing(visit_id))?;
            let items = rows::billing_items(conn, billing.id)?;
            Ok(BillingStatement { billing, items })
        })
    }
}

fn validate_items(items: &[NewBillingItem]) -> CareResult<i64> {
    if items.is_empty() {
        return Err(CareError::InvalidInput(
            "billing needs at least one item".into(),
        ));
    }

    items.iter().try_fold(0i64, |total, item| {
        if item.amount <= 0 {
            return Err(CareError::InvalidInput(format!(
                "item '{}' must have a positive amount, got {}",
                item.description, item.amount
            )));
        }
        total
            .checked_add(item.amount)
            .ok_or_else(|| CareError::InvalidInput("billing total overflows".into()))
    })
}

/// Refuses when any payment has been taken against the bill.
///
/// Both signals count: a non-zero `paid_amount` or a status other than `pending`. A visit
/// without a bill is unlockable.
pub(crate) fn ensure_unlockable(visit_id: Uuid, billing: Option<&Billing>) -> CareResult<()> {
    match billing {
        Some(billing) if billing.has_payment_progress() => Err(CareError::PaymentInProgress {
            visit: visit_id,
            paid_amount: billing.paid_amount,
            status: billing.payment_status,
        }),
        _ => Ok(()),
    }
}

/// Requires an existing bill that is fully paid.
pub(crate) fn ensure_paid(visit_id: Uuid, billing: Option<&Billing>) -> CareResult<()> {
    let billing = billing.ok_or(CareError::BillingMissing(visit_id))?;
    if billing.payment_status != PaymentStatus::Paid {
        return Err(CareError::PaymentIncomplete {
            visit: visit_id,
            status: billing.payment_status,
            paid_amount: billing.paid_amount,
            total_amount: billing.total_amount,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::VisitType;
    use crate::repositories::tests::{register, register_in_status};
    use crate::repositories::visits::VisitService;
    use crate::store::tests::temp_store;

    pub(crate) fn items(amounts: &[i64]) -> Vec<NewBillingItem> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| NewBillingItem {
                description: NonEmptyText::new(format!("item {}", i + 1)).unwrap(),
                amount: *amount,
            })
            .collect()
    }

    fn billing(paid_amount: i64, payment_status: PaymentStatus) -> Billing {
        Billing {
            id: Uuid::new_v4(),
            visit_id: Uuid::new_v4(),
            total_amount: 100,
            paid_amount,
            payment_status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_unlock_gate_checks_amount_and_status() {
        let visit = Uuid::new_v4();
        assert!(ensure_unlockable(visit, None).is_ok());
        assert!(ensure_unlockable(visit, Some(&billing(0, PaymentStatus::Pending))).is_ok());

        for blocked in [
            billing(10, PaymentStatus::Partial),
            billing(0, PaymentStatus::Partial),
            billing(10, PaymentStatus::Pending),
            billing(100, PaymentStatus::Paid),
        ] {
            let err = ensure_unlockable(visit, Some(&blocked)).unwrap_err();
            assert_eq!(err.rule(), "PaymentInProgress");
        }
    }

    #[test]
    fn test_paid_gate() {
        let visit = Uuid::new_v4();
        assert_eq!(ensure_paid(visit, None).unwrap_err().rule(), "BillingMissing");
        assert_eq!(
            ensure_paid(visit, Some(&billing(40, PaymentStatus::Partial)))
                .unwrap_err()
                .rule(),
            "PaymentIncomplete"
        );
        assert!(ensure_paid(visit, Some(&billing(100, PaymentStatus::Paid))).is_ok());
    }

    #[test]
    fn test_create_billing_totals_items_and_bills_visit() {
        let (_dir, store) = temp_store();
        let service = BillingService::new(store.clone());
        let visit = register_in_status(&store, VisitType::Outpatient, VisitStatus::ReadyForBilling);

        let statement = service.create_billing(visit.id, &items(&[150, 50])).unwrap();
        assert_eq!(statement.billing.total_amount, 200);
        assert_eq!(statement.billing.payment_status, PaymentStatus::Pending);
        assert_eq!(statement.items.len(), 2);

        let stored = store.read(|c| rows::require_visit(c, visit.id)).unwrap();
        assert_eq!(stored.status, VisitStatus::Billed);
        assert_eq!(service.get_billing(visit.id).unwrap(), statement);
    }

    #[test]
    fn test_create_billing_preconditions() {
        let (_dir, store) = temp_store();
        let service = BillingService::new(store.clone());
        let early = register(&store, VisitType::Outpatient);
        assert_eq!(
            service.create_billing(early.id, &items(&[10])).unwrap_err().kind(),
            ErrorKind::InvalidTransition
        );

        let ready = register_in_status(&store, VisitType::Outpatient, VisitStatus::ReadyForBilling);
        assert_eq!(
            service.create_billing(ready.id, &[]).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            service.create_billing(ready.id, &items(&[10, 0])).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert!(service.get_billing(ready.id).is_err());
    }

    #[test]
    fn test_partial_then_full_payment() {
        let (_dir, store) = temp_store();
        let service = BillingService::new(store.clone());
        let visit = register_in_status(&store, VisitType::Outpatient, VisitStatus::ReadyForBilling);
        service.create_billing(visit.id, &items(&[100])).unwrap();

        let partial = service.record_payment(visit.id, 40).unwrap();
        assert_eq!(partial.payment_status, PaymentStatus::Partial);
        let stored = store.read(|c| rows::require_visit(c, visit.id)).unwrap();
        assert_eq!(stored.status, VisitStatus::Billed);

        let err = service.record_payment(visit.id, 61).unwrap_err();
        assert_eq!(err.rule(), "Overpayment");

        let paid = service.record_payment(visit.id, 60).unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.paid_amount, 100);
        let stored = store.read(|c| rows::require_visit(c, visit.id)).unwrap();
        assert_eq!(stored.status, VisitStatus::Paid);

        assert_eq!(service.record_payment(visit.id, 1).unwrap_err().rule(), "AlreadyPaid");
    }

    #[test]
    fn test_no_payment_on_cancelled_visit() {
        let (_dir, store) = temp_store();
        let service = BillingService::new(store.clone());
        let visits = VisitService::new(store.clone());
        let visit = register_in_status(&store, VisitType::Outpatient, VisitStatus::ReadyForBilling);
        service.create_billing(visit.id, &items(&[100])).unwrap();
        visits
            .transition_status(visit.id, VisitStatus::Cancelled, Some("left"))
            .unwrap();

        let err = service.record_payment(visit.id, 40).unwrap_err();
        assert_eq!(err.rule(), "VisitClosed");
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let stored = service.get_billing(visit.id).unwrap().billing;
        assert_eq!(stored.paid_amount, 0);
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn test_payment_requires_billed_visit() {
        let (_dir, store) = temp_store();
        let service = BillingService::new(store.clone());
        let visit = register_in_status(&store, VisitType::Outpatient, VisitStatus::Examined);
        let billing = Billing {
            visit_id: visit.id,
            ..billing(0, PaymentStatus::Pending)
        };
        store
            .write("test_billing", |tx| rows::insert_billing(tx, &billing))
            .unwrap();

        let err = service.record_payment(visit.id, 10).unwrap_err();
        assert_eq!(err.rule(), "InvalidTransition");
    }

    #[test]
    fn test_payment_validation() {
        let (_dir, store) = temp_store();
        let service = BillingService::new(store.clone());
        let visit = register(&store, VisitType::Outpatient);

        assert_eq!(
            service.record_payment(visit.id, 0).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            service.record_payment(visit.id, 10).unwrap_err().rule(),
            "BillingMissing"
        );
    }
}
