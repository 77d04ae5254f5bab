fn main() -> mqtt_ws_gateway::Result<()> {
    mqtt_ws_gateway::cli::main()
}
