//! TcpRegisterClient against the in-process simulator

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::time::Duration;

use fieldlink_modbus::constants::EXCEPTION_ILLEGAL_DATA_ADDRESS;
use fieldlink_modbus::simulator::ModbusSimulator;
use fieldlink_modbus::{
    decode_f32_prefix, Connector, DeviceEndpoint, LegacyField, ModbusError, Negotiator,
    RegisterClient, RegisterOrder, TcpConnector, TcpRegisterClient, UnitSelector,
};

async fn start_device() -> (ModbusSimulator, DeviceEndpoint) {
    let sim = ModbusSimulator::new();
    let addr = sim.start(0).await.unwrap();
    let endpoint = DeviceEndpoint::new("127.0.0.1", addr.port(), 1)
        .with_request_timeout(Duration::from_millis(500));
    (sim, endpoint)
}

#[tokio::test]
async fn test_read_block_through_negotiator() {
    let (sim, endpoint) = start_device().await;
    sim.set_registers(125, &[22848, 0, 1782, 0]).await;

    let mut client = TcpConnector.connect(&endpoint).await.unwrap();
    let regs = Negotiator::default()
        .read_holding(client.as_mut(), endpoint.unit_id, 125, 4)
        .await
        .unwrap();
    client.close().await.unwrap();

    assert_eq!(regs, vec![22848, 0, 1782, 0]);
    let floats = decode_f32_prefix(&regs, RegisterOrder::ABCD);
    assert_eq!(floats, vec![f32::from_bits(0x5940_0000), f32::from_bits(0x06F6_0000)]);
}

#[tokio::test]
async fn test_write_then_read_back() {
    let (sim, endpoint) = start_device().await;
    sim.set_register(127, 55).await;

    let mut client = TcpRegisterClient::connect(endpoint.clone()).await.unwrap();
    let negotiator = Negotiator::default();
    negotiator
        .write_register(&mut client, 1, 127, 0)
        .await
        .unwrap();
    let readback = negotiator.read_holding(&mut client, 1, 127, 1).await.unwrap();

    assert_eq!(readback, vec![0]);
    assert_eq!(sim.writes().await, vec![(127, 0)]);
}

#[tokio::test]
async fn test_legacy_selector_is_unsupported() {
    let (_sim, endpoint) = start_device().await;
    let mut client = TcpRegisterClient::connect(endpoint).await.unwrap();

    let err = client
        .read_holding_registers(UnitSelector::Legacy(LegacyField::Slave, 1), 0, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ModbusError::Unsupported(_)));
    // Rejection happens before anything reaches the wire
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_session_selector_uses_session_unit() {
    let (sim, endpoint) = start_device().await;
    sim.set_register(10, 42).await;
    let mut client = TcpRegisterClient::connect(endpoint).await.unwrap();

    assert!(client.set_session_unit(Some(1)));
    let regs = client
        .read_holding_registers(UnitSelector::Session, 10, 1)
        .await
        .unwrap();
    assert_eq!(regs, vec![42]);
}

#[tokio::test]
async fn test_device_exception_keeps_connection() {
    let (sim, endpoint) = start_device().await;
    sim.fail_reads_at(428, EXCEPTION_ILLEGAL_DATA_ADDRESS).await;
    let mut client = TcpRegisterClient::connect(endpoint).await.unwrap();

    let err = client
        .read_holding_registers(UnitSelector::DeviceId(1), 428, 10)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ModbusError::Device {
            function: 0x03,
            code: EXCEPTION_ILLEGAL_DATA_ADDRESS
        }
    );
    assert!(client.is_connected());

    // Same connection still serves the next request
    let regs = client
        .read_holding_registers(UnitSelector::DeviceId(1), 427, 10)
        .await
        .unwrap();
    assert_eq!(regs.len(), 10);

    sim.clear_faults().await;
    let regs = client
        .read_holding_registers(UnitSelector::DeviceId(1), 428, 10)
        .await
        .unwrap();
    assert_eq!(regs.len(), 10);
    assert_eq!(sim.reads().await, vec![(428, 10), (427, 10), (428, 10)]);
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let endpoint = DeviceEndpoint::new("127.0.0.1", port, 1)
        .with_connect_timeout(Duration::from_millis(300));
    let err = TcpConnector.connect(&endpoint).await.err().unwrap();
    assert!(err.needs_reconnect(), "unexpected error: {err}");
}
