pub mod publish_review_route;
pub mod stream_review_route;
