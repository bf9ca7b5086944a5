pub mod flutterwave;
pub mod paystack;

pub use flutterwave::{FlutterwaveConfig, FlutterwaveGateway};
pub use paystack::{PaystackConfig, PaystackGateway};
