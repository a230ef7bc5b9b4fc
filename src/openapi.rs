use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "pastyshop API",
        description = "Storefront backend: carts, coupons, orders, payments and recommendations"
    ),
    paths(
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::apply_coupon,
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::payments::create_checkout_session,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::entities::product::Model,
        crate::entities::coupon::Model,
        crate::entities::order::Model,
        crate::entities::order_item::Model,
        crate::errors::ErrorResponse,
        crate::services::cart::CartLine,
        crate::services::cart::CartLineView,
        crate::services::cart::AppliedCoupon,
        crate::services::cart::CartView,
        crate::services::orders::CustomerInfo,
        crate::services::orders::OrderTotals,
        crate::handlers::products::ProductDetailResponse,
        crate::handlers::carts::AddItemRequest,
        crate::handlers::carts::UpdateItemRequest,
        crate::handlers::carts::ApplyCouponRequest,
        crate::handlers::carts::CartDetailResponse,
        crate::handlers::orders::CreateOrderRequest,
        crate::handlers::orders::OrderResponse,
        crate::handlers::payments::CheckoutSessionRequest,
        crate::handlers::payments::CheckoutSessionResponse,
    )),
    tags(
        (name = "Products", description = "Product catalog"),
        (name = "Carts", description = "Session carts and coupons"),
        (name = "Orders", description = "Order creation and lookup"),
        (name = "Payments", description = "Checkout sessions and webhooks"),
    )
)]
pub struct ApiDoc;
