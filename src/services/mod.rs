pub mod dice_service;
