mod batches;
mod chunks;
mod sessions;
