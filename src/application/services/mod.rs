pub mod trading_service;
