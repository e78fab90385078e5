//! Checkout data model shared by the services, adapters and webhook.

pub mod address;
pub mod cart;
pub mod coupon;
pub mod customer;
pub mod money;
pub mod order;
pub mod payment;
pub mod shipping;

pub use address::{Address, AddressKey, RegionDirectory};
pub use cart::{CartLine, CartSnapshot};
pub use coupon::{AppliedCoupon, Coupon, CouponValidation, CouponValidationRequest, DiscountDescriptor};
pub use customer::PersonalData;
pub use order::{
    BillingDetails, CouponLine, LineItemPayload, OrderCreated, OrderPayload, OrderStatus,
    PendingOrder, ShippingLine,
};
pub use payment::{
    CallbackUrls, ClientPaymentSignal, ClientRoute, ConfirmationStatus, PaymentConfirmation,
    PaymentSession, PaymentSessionRequest,
};
pub use shipping::{ShippingMethod, ShippingZone, ZoneLookupRequest, ZoneMethod};
