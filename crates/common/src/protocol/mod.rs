pub mod toolrpc;
