pub mod order;
pub mod payment;
pub mod seat;
pub mod ticket;

pub use order::{Order, OrderItem, OrderLine, OrderReceipt, PricedLine};
pub use payment::{
    NewRefund, Payment, PaymentNotification, PaymentStatusView, Refund, SettlementAction,
    SettlementOutcome, SettlementTarget,
};
pub use seat::{EffectiveSeatStatus, PriceTier, PricedSeat, Seat, SeatView};
pub use ticket::{
    GeneratedTicket, ReservationDetail, TicketReservation, TicketType, TicketTypeAvailability,
};
