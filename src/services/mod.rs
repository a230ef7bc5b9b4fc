pub mod cart;
pub mod coupons;
pub mod orders;
pub mod payments;
pub mod products;
pub mod recommender;

pub use cart::{CartService, CartState};
pub use coupons::CouponService;
pub use orders::OrderService;
pub use payments::StripeCheckoutService;
pub use products::ProductService;
pub use recommender::Recommender;
