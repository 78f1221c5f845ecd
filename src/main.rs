fn main() {
    sensor_logger_lib::run()
}
